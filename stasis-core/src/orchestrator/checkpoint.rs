// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint orchestration.
//!
//! Resolves the target, claims it, probes it, then walks the configured
//! fallback chain until one strategy succeeds. Only a successful attempt
//! produces a record; an exhausted chain leaves the generation directory
//! behind with each attempt's engine log.

use std::path::PathBuf;
use std::time::Duration;

use crate::callbacks::HookCallbacks;
use crate::config::{Config, HookConfig, StrategyChains};
use crate::criu::{CheckpointEngine, ImagesDir};
use crate::error::{EngineFailure, PreconditionError, StasisError, StasisResult, StrategyOutcome};
use crate::metadata::{
    unix_now, CheckpointRecord, ContainerIdentity, Generation, MetadataStore,
};
use crate::options::{OptionBuilder, ResourceFlags, SnapshotPlan};
use crate::probe::{CapabilityProfile, LifecycleState, ProcessProbe};
use crate::runtime::RuntimeConnector;
use crate::state::{CheckpointPhase, PhaseMachine};
use crate::types::{CaptureTarget, ContainerRef, ProcessId, Strategy, TargetSpec};

use super::locks::TargetLocks;

/// What to checkpoint and where.
#[derive(Debug, Clone)]
pub struct CheckpointRequest {
    pub target: TargetSpec,
    pub destination: PathBuf,
    /// Keep the source running after the dump.
    pub leave_running: bool,
}

impl CheckpointRequest {
    pub fn new(target: TargetSpec, destination: impl Into<PathBuf>) -> Self {
        Self {
            target,
            destination: destination.into(),
            leave_running: true,
        }
    }

    /// Stop the source after the dump, for moving it elsewhere.
    pub fn relocate(mut self) -> Self {
        self.leave_running = false;
        self
    }
}

/// A completed checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointReport {
    pub target: CaptureTarget,
    pub record: CheckpointRecord,
    pub record_path: PathBuf,
    /// Every attempt in order; the last one succeeded.
    pub outcomes: Vec<StrategyOutcome>,
    pub elapsed: Duration,
}

/// Successful attempt details that end up in the record.
struct Captured {
    flags: ResourceFlags,
    checkpoint_name: Option<String>,
}

/// Drives checkpoints through an engine and a container runtime.
pub struct CheckpointOrchestrator<E, C> {
    engine: E,
    connector: C,
    probe: ProcessProbe,
    builder: OptionBuilder,
    chains: StrategyChains,
    hooks: HookConfig,
    locks: TargetLocks,
}

impl<E: CheckpointEngine, C: RuntimeConnector> CheckpointOrchestrator<E, C> {
    pub fn new(config: &Config, engine: E, connector: C) -> Self {
        Self {
            engine,
            connector,
            probe: ProcessProbe::new(&config.proc_root),
            builder: OptionBuilder::new(&config.engine),
            chains: config.strategies.clone(),
            hooks: config.hooks.clone(),
            locks: TargetLocks::new(config.lock_dir.clone()),
        }
    }

    /// Share an exclusivity registry with other orchestrators.
    pub fn with_locks(mut self, locks: TargetLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn checkpoint(&self, request: &CheckpointRequest) -> StasisResult<CheckpointReport> {
        let mut machine = PhaseMachine::<CheckpointPhase>::new(request.target.to_string());
        let result = self.run(&mut machine, request);

        match &result {
            Ok(report) => tracing::info!(
                target = %report.target,
                strategy = %report.record.strategy,
                record_id = %report.record.record_id,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Checkpoint completed"
            ),
            Err(e) => {
                tracing::error!(
                    target = %request.target,
                    phase = %machine.phase(),
                    error = %e,
                    "Checkpoint failed"
                );
                machine.fail();
            }
        }

        result
    }

    fn run(
        &self,
        machine: &mut PhaseMachine<CheckpointPhase>,
        request: &CheckpointRequest,
    ) -> StasisResult<CheckpointReport> {
        let is_container = matches!(request.target, TargetSpec::Container(_));
        let chain = self.chains.for_target(is_container);

        // Delegated strategies never run the engine themselves.
        if chain.iter().any(|strategy| strategy.is_direct()) {
            let version = self
                .engine
                .version()
                .map_err(|failure| StasisError::EngineUnavailable {
                    reason: failure.reason,
                })?;
            tracing::debug!(version = %version, "Checkpoint engine available");
        }

        let target = self.resolve(&request.target)?;
        let _guard = self.locks.acquire(&target.lock_key())?;

        machine.advance(CheckpointPhase::Probing)?;
        let mut profile = self.probe_checkpointable(target.pid())?;

        let store = MetadataStore::new(&request.destination);
        let generation = store.allocate()?;

        let mut outcomes = Vec::with_capacity(chain.len());

        for (attempt, strategy) in chain.iter().copied().enumerate() {
            if attempt > 0 {
                machine.advance(CheckpointPhase::Probing)?;
                profile = self.probe_checkpointable(target.pid())?;
            }

            machine.advance(CheckpointPhase::OptionBuilding)?;
            let images = ImagesDir::open(&generation.dir).map_err(|e| StasisError::Io {
                context: "opening images directory",
                source: e,
            })?;
            if attempt > 0 {
                discard_partial_images(&images)?;
            }

            tracing::info!(
                target = %target,
                strategy = %strategy,
                attempt = attempt + 1,
                of = chain.len(),
                "Attempting checkpoint"
            );

            let plan = self
                .builder
                .build(&profile, strategy, &images, request.leave_running);
            machine.advance(CheckpointPhase::Invoking)?;

            match self.invoke(&target, plan, &generation, request.leave_running) {
                Ok(captured) => {
                    drop(images);
                    outcomes.push(StrategyOutcome::Succeeded(strategy));

                    machine.advance(CheckpointPhase::Recording)?;
                    let record = CheckpointRecord {
                        record_id: generation.record_id.clone(),
                        container: identity(&target),
                        pid: target.pid(),
                        strategy,
                        created_at: unix_now(),
                        images_dir: generation.dir.clone(),
                        flags: captured.flags,
                        checkpoint_name: captured.checkpoint_name,
                    };
                    let record_path = store.commit(&record)?;
                    machine.advance(CheckpointPhase::Done)?;

                    return Ok(CheckpointReport {
                        target,
                        record,
                        record_path,
                        outcomes,
                        elapsed: machine.elapsed(),
                    });
                }
                Err(failure) => {
                    tracing::warn!(
                        target = %target,
                        strategy = %strategy,
                        reason = %failure.reason,
                        "Checkpoint strategy failed"
                    );
                    outcomes.push(StrategyOutcome::Failed { strategy, failure });
                }
            }
        }

        Err(StasisError::CheckpointExhausted {
            target: target.to_string(),
            outcomes,
        })
    }

    /// Turn a user-supplied target into a live capture target.
    fn resolve(&self, spec: &TargetSpec) -> StasisResult<CaptureTarget> {
        let reference = match spec {
            TargetSpec::Process(pid) => return Ok(CaptureTarget::Process { pid: *pid }),
            TargetSpec::Container(reference) => reference,
        };

        let runtime = self.connector.connect()?;
        let state = runtime.inspect(reference.as_str())?.ok_or_else(|| {
            PreconditionError::ContainerNotFound {
                id: reference.to_string(),
            }
        })?;

        if !state.is_live() {
            return Err(PreconditionError::TargetNotRunning {
                target: format!("container {}", reference),
                state: state.status,
            }
            .into());
        }

        let pid = ProcessId::new(state.pid)?;
        tracing::debug!(container = %reference, id = %state.id, pid = %pid, "Resolved container");

        Ok(CaptureTarget::Container {
            id: ContainerRef::new(state.id)?,
            name: ContainerRef::new(state.name)?,
            image: state.image,
            pid,
        })
    }

    /// Fresh profile, refusing states no strategy can handle.
    fn probe_checkpointable(&self, pid: ProcessId) -> StasisResult<CapabilityProfile> {
        let profile = self.probe.probe(pid).map_err(PreconditionError::from)?;

        match profile.state {
            LifecycleState::Zombie => Err(PreconditionError::ZombieProcess { pid }.into()),
            LifecycleState::Dead => Err(PreconditionError::DeadProcess { pid }.into()),
            _ => {
                tracing::debug!(
                    pid = %pid,
                    state = %profile.state,
                    tcp = profile.has_established_tcp,
                    unix = profile.has_unix_sockets,
                    shell_job = profile.is_shell_job,
                    "Probed target"
                );
                Ok(profile)
            }
        }
    }

    fn invoke(
        &self,
        target: &CaptureTarget,
        plan: SnapshotPlan,
        generation: &Generation,
        leave_running: bool,
    ) -> Result<Captured, EngineFailure> {
        match plan {
            SnapshotPlan::Direct(options) => {
                let mut callbacks =
                    HookCallbacks::new(self.hooks.clone()).with_pid(target.pid().value());
                self.engine.dump(&options, &mut callbacks)?;
                Ok(Captured {
                    flags: options.flags,
                    checkpoint_name: None,
                })
            }
            SnapshotPlan::Delegate => {
                let CaptureTarget::Container { id, .. } = target else {
                    let reason = format!(
                        "{} requires a container target",
                        Strategy::ContainerNativeDelegate
                    );
                    return Err(EngineFailure::new(reason, ""));
                };

                let name = format!("stasis-{}", generation.record_id);
                let runtime = self.connector.connect()?;
                runtime.checkpoint(id.as_str(), &name, &generation.dir, leave_running)?;
                Ok(Captured {
                    flags: ResourceFlags::default(),
                    checkpoint_name: Some(name),
                })
            }
        }
    }
}

fn identity(target: &CaptureTarget) -> Option<ContainerIdentity> {
    match target {
        CaptureTarget::Process { .. } => None,
        CaptureTarget::Container { id, name, image, .. } => Some(ContainerIdentity {
            id: id.clone(),
            name: name.clone(),
            image: image.clone(),
        }),
    }
}

/// Remove images a failed attempt left behind. Logs are kept.
fn discard_partial_images(images: &ImagesDir) -> StasisResult<()> {
    let stale = images.image_files().map_err(|e| StasisError::Io {
        context: "listing images directory",
        source: e,
    })?;
    for name in &stale {
        std::fs::remove_file(images.path().join(name)).map_err(|e| StasisError::Io {
            context: "removing partial image",
            source: e,
        })?;
    }
    if !stale.is_empty() {
        tracing::debug!(count = stale.len(), "Discarded partial images");
    }
    Ok(())
}
