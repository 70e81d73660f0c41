// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Restore orchestration.
//!
//! Loads the record first and reconciles nothing until it does. Restores
//! use exactly the strategy the record names; there is no fallback. Success
//! is only reported once the target is observed live.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::callbacks::HookCallbacks;
use crate::config::{Config, HookConfig, RuntimeConfig, VerifyConfig};
use crate::criu::{CheckpointEngine, ImagesDir};
use crate::error::{EngineFailure, PreconditionError, StasisError, StasisResult};
use crate::metadata::{CheckpointRecord, MetadataStore};
use crate::options::{OptionBuilder, SnapshotPlan};
use crate::probe::ProcessProbe;
use crate::runtime::{ContainerRuntime, RuntimeConnector};
use crate::state::{PhaseMachine, RestorePhase};
use crate::types::{container_lock_key, process_lock_key, ContainerRef, ProcessId};

use super::locks::TargetLocks;

/// Which checkpoint to restore and into what.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Destination directory or a specific generation inside it.
    pub checkpoint_dir: PathBuf,
    /// Container to restore into instead of the recorded one.
    pub target: Option<ContainerRef>,
}

impl RestoreRequest {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            target: None,
        }
    }

    pub fn into_container(mut self, target: ContainerRef) -> Self {
        self.target = Some(target);
        self
    }
}

/// A verified restore.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub record: CheckpointRecord,
    /// Generation directory the images came from.
    pub record_dir: PathBuf,
    /// Runtime id of the container restored into.
    pub container: Option<String>,
    /// Live root process after verification.
    pub pid: ProcessId,
    /// Liveness checks used before the target was seen live.
    pub checks: u32,
    pub elapsed: Duration,
}

/// Where the restored tree is expected to run.
enum Destination {
    Process,
    Container { id: String, reference: ContainerRef },
}

/// Drives restores through an engine and a container runtime.
pub struct RestoreOrchestrator<E, C> {
    engine: E,
    connector: C,
    probe: ProcessProbe,
    builder: OptionBuilder,
    runtime_config: RuntimeConfig,
    verify: VerifyConfig,
    hooks: HookConfig,
    locks: TargetLocks,
}

impl<E: CheckpointEngine, C: RuntimeConnector> RestoreOrchestrator<E, C> {
    pub fn new(config: &Config, engine: E, connector: C) -> Self {
        Self {
            engine,
            connector,
            probe: ProcessProbe::new(&config.proc_root),
            builder: OptionBuilder::new(&config.engine),
            runtime_config: config.runtime.clone(),
            verify: config.verify,
            hooks: config.hooks.clone(),
            locks: TargetLocks::new(config.lock_dir.clone()),
        }
    }

    /// Share an exclusivity registry with other orchestrators.
    pub fn with_locks(mut self, locks: TargetLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn restore(&self, request: &RestoreRequest) -> StasisResult<RestoreReport> {
        let label = request.checkpoint_dir.display().to_string();
        let mut machine = PhaseMachine::<RestorePhase>::new(label.as_str());
        let result = self.run(&mut machine, request);

        match &result {
            Ok(report) => tracing::info!(
                checkpoint = %label,
                strategy = %report.record.strategy,
                pid = %report.pid,
                checks = report.checks,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Restore completed"
            ),
            Err(e) => {
                tracing::error!(
                    checkpoint = %label,
                    phase = %machine.phase(),
                    error = %e,
                    "Restore failed"
                );
                machine.fail();
            }
        }

        result
    }

    fn run(
        &self,
        machine: &mut PhaseMachine<RestorePhase>,
        request: &RestoreRequest,
    ) -> StasisResult<RestoreReport> {
        machine.advance(RestorePhase::MetadataLoad)?;
        let loaded = MetadataStore::load(&request.checkpoint_dir)?;
        let record = loaded.record;

        if record.strategy.is_direct() {
            let version = self
                .engine
                .version()
                .map_err(|failure| StasisError::EngineUnavailable {
                    reason: failure.reason,
                })?;
            tracing::debug!(version = %version, "Checkpoint engine available");
        }

        let reference = match (&request.target, &record.container) {
            (Some(reference), _) => Some(reference.clone()),
            (None, Some(identity)) => Some(identity.name.clone()),
            (None, None) => None,
        };
        let lock_key = match &reference {
            Some(reference) => container_lock_key(reference),
            None => process_lock_key(record.pid),
        };
        let _guard = self.locks.acquire(&lock_key)?;

        machine.advance(RestorePhase::TargetReconciliation)?;
        let destination = match reference {
            Some(reference) => {
                let image = record
                    .container
                    .as_ref()
                    .map(|c| c.image.as_str())
                    .filter(|image| !image.is_empty());
                let runtime = self.connector.connect()?;
                let id = self.reconcile(runtime.as_ref(), &reference, image)?;
                Destination::Container { id, reference }
            }
            None => {
                tracing::debug!(pid = %record.pid, "Bare process checkpoint, restoring in place");
                Destination::Process
            }
        };

        machine.advance(RestorePhase::Invoking)?;
        let restored = self
            .invoke(&record, &loaded.dir, &destination)
            .map_err(|failure| StasisError::RestoreFailed {
                strategy: record.strategy,
                failure,
            })?;

        machine.advance(RestorePhase::Verifying)?;
        let (pid, checks) = match &destination {
            Destination::Container { id, reference } => {
                self.verify_container(id, reference)?
            }
            Destination::Process => {
                let pid = restored.ok_or_else(|| StasisError::RestoreUnverified {
                    target: format!("pid {}", record.pid),
                    attempts: 0,
                    last_state: "engine reported no restored pid".to_string(),
                })?;
                self.verify_process(pid)?
            }
        };
        machine.advance(RestorePhase::Done)?;

        let container = match destination {
            Destination::Container { id, .. } => Some(id),
            Destination::Process => None,
        };

        Ok(RestoreReport {
            record,
            record_dir: loaded.dir,
            container,
            pid,
            checks,
            elapsed: machine.elapsed(),
        })
    }

    /// Bring the container into a stopped state with live namespaces.
    ///
    /// A container built from a different image than the recorded one is
    /// removed and recreated.
    fn reconcile(
        &self,
        runtime: &dyn ContainerRuntime,
        reference: &ContainerRef,
        image: Option<&str>,
    ) -> StasisResult<String> {
        let grace = self.runtime_config.stop_grace;

        match (runtime.inspect(reference.as_str())?, image) {
            (Some(state), Some(image)) if state.image != image => {
                tracing::info!(
                    container = %reference,
                    id = %state.id,
                    found = %state.image,
                    recorded = image,
                    "Replacing container built from another image"
                );
                if state.running {
                    runtime.stop(&state.id, grace)?;
                }
                runtime.remove(&state.id, true)?;
                self.recreate(runtime, reference, image)
            }
            (Some(state), _) if state.running => {
                tracing::info!(
                    container = %reference,
                    id = %state.id,
                    "Stopping running container before restore"
                );
                runtime.stop(&state.id, grace)?;
                Ok(state.id)
            }
            (Some(state), _) => {
                tracing::info!(
                    container = %reference,
                    id = %state.id,
                    status = %state.status,
                    "Reusing stopped container"
                );
                Ok(state.id)
            }
            (None, Some(image)) => self.recreate(runtime, reference, image),
            (None, None) => Err(PreconditionError::ContainerNotFound {
                id: reference.to_string(),
            }
            .into()),
        }
    }

    /// Create, start, confirm and stop a placeholder container.
    fn recreate(
        &self,
        runtime: &dyn ContainerRuntime,
        reference: &ContainerRef,
        image: &str,
    ) -> StasisResult<String> {
        tracing::info!(container = %reference, image, "Recreating container from recorded image");
        let id = runtime.create(
            image,
            reference.as_str(),
            &self.runtime_config.placeholder_command,
        )?;
        runtime.start(&id)?;

        match runtime.inspect(&id)? {
            Some(state) if state.is_live() => {
                tracing::debug!(id = %id, pid = state.pid, "Container namespaces materialized");
            }
            other => {
                return Err(PreconditionError::TargetNotRunning {
                    target: format!("container {}", reference),
                    state: other
                        .map(|s| s.status)
                        .unwrap_or_else(|| "missing after create".to_string()),
                }
                .into())
            }
        }

        runtime.stop(&id, self.runtime_config.stop_grace)?;
        Ok(id)
    }

    fn invoke(
        &self,
        record: &CheckpointRecord,
        record_dir: &Path,
        destination: &Destination,
    ) -> Result<Option<ProcessId>, EngineFailure> {
        let images = ImagesDir::open(record_dir).map_err(|e| {
            EngineFailure::new(
                format!("failed to open images directory {}: {}", record_dir.display(), e),
                "",
            )
        })?;

        tracing::info!(
            record_id = %record.record_id,
            strategy = %record.strategy,
            images = %record_dir.display(),
            "Invoking restore"
        );

        match self.builder.restore(record.strategy, record.flags, &images) {
            SnapshotPlan::Direct(options) => {
                let mut callbacks = HookCallbacks::new(self.hooks.clone());
                let pid = self.engine.restore(&options, &mut callbacks)?;
                Ok(Some(pid))
            }
            SnapshotPlan::Delegate => {
                let Destination::Container { id, .. } = destination else {
                    return Err(EngineFailure::new(
                        "delegated checkpoint has no container to restore into",
                        "",
                    ));
                };
                let name = record.checkpoint_name.as_deref().ok_or_else(|| {
                    EngineFailure::new("delegated checkpoint has no checkpoint name", "")
                })?;

                let runtime = self.connector.connect()?;
                runtime.start_from_checkpoint(id, name, record_dir)?;
                Ok(None)
            }
        }
    }

    /// Poll the runtime until the container runs with a real pid.
    fn verify_container(
        &self,
        id: &str,
        reference: &ContainerRef,
    ) -> StasisResult<(ProcessId, u32)> {
        let runtime = self.connector.connect()?;
        let mut last_state = String::from("not inspected");

        for check in 1..=self.verify.attempts {
            match runtime.inspect(id)? {
                Some(state) if state.is_live() => {
                    let pid = ProcessId::new(state.pid)?;
                    return Ok((pid, check));
                }
                Some(state) => {
                    last_state = format!("{} (pid {})", state.status, state.pid);
                }
                None => last_state = "absent".to_string(),
            }
            tracing::debug!(
                container = %reference,
                check,
                state = %last_state,
                "Restored container not live yet"
            );
            self.backoff(check);
        }

        Err(StasisError::RestoreUnverified {
            target: format!("container {}", reference),
            attempts: self.verify.attempts,
            last_state,
        })
    }

    /// Poll procfs until the restored pid exists and is not a zombie.
    fn verify_process(&self, pid: ProcessId) -> StasisResult<(ProcessId, u32)> {
        let mut last_state = String::from("not probed");

        for check in 1..=self.verify.attempts {
            match self.probe.probe(pid) {
                Ok(profile) if profile.state.is_checkpointable() => return Ok((pid, check)),
                Ok(profile) => last_state = profile.state.to_string(),
                Err(e) => last_state = e.to_string(),
            }
            tracing::debug!(
                pid = %pid,
                check,
                state = %last_state,
                "Restored process not live yet"
            );
            self.backoff(check);
        }

        Err(StasisError::RestoreUnverified {
            target: format!("pid {}", pid),
            attempts: self.verify.attempts,
            last_state,
        })
    }

    fn backoff(&self, check: u32) {
        if check < self.verify.attempts {
            thread::sleep(self.verify.backoff);
        }
    }
}
