// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end orchestration tests for Stasis.
//!
//! These tests drive both orchestrators against a synthetic `/proc` tree,
//! an in-memory container runtime and a scripted checkpoint engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stasis_core::callbacks::LifecycleCallbacks;
use stasis_core::criu::{CheckpointEngine, EngineVersion};
use stasis_core::error::{
    EngineFailure, MetadataError, PreconditionError, RuntimeError, StasisError,
    StrategyOutcome,
};
use stasis_core::metadata::{MetadataStore, LATEST_FILE, RECORD_FILE};
use stasis_core::options::{SnapshotOptions, CONTAINER_DUMP_LOG, MINIMAL_DUMP_LOG};
use stasis_core::runtime::{ContainerRuntime, ContainerState, RuntimeConnector};
use stasis_core::{
    CheckpointOrchestrator, CheckpointRequest, Config, ContainerRef, ProcessId,
    RestoreOrchestrator, RestoreRequest, Strategy, TargetLocks, TargetSpec,
};
use tempfile::TempDir;

const TCP_TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   0: 0100007F:1F90 0100007F:D431 01 00000000:00000000 00:00000000 00000000  1000        0 51234 1\n";

// =============================================================================
// Synthetic procfs
// =============================================================================

fn fake_process(proc_root: &Path, pid: u32, state: char, tcp: bool) {
    let dir = proc_root.join(pid.to_string());
    fs::create_dir_all(dir.join("fd")).unwrap();
    fs::create_dir_all(dir.join("net")).unwrap();
    fs::write(
        dir.join("stat"),
        format!("{} (worker) {} 1 {} {} 0 -1 4194560", pid, state, pid, pid + 1),
    )
    .unwrap();
    fs::write(dir.join("cmdline"), b"worker\0--serve\0").unwrap();
    if tcp {
        fs::write(dir.join("net/tcp"), TCP_TABLE).unwrap();
    }
}

// =============================================================================
// In-memory container runtime
// =============================================================================

#[derive(Default)]
struct World {
    containers: Vec<ContainerState>,
    ops: Vec<String>,
    connects: usize,
    next_pid: u32,
}

impl World {
    fn find(&self, id: &str) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.id == id || c.name == id)
    }

    fn container(&self, id: &str) -> Option<&ContainerState> {
        self.find(id).map(|i| &self.containers[i])
    }
}

fn running_container(id: &str, name: &str, image: &str, pid: u32) -> ContainerState {
    ContainerState {
        id: id.to_string(),
        name: name.to_string(),
        image: image.to_string(),
        running: true,
        pid,
        status: "running".to_string(),
    }
}

#[derive(Clone, Default)]
struct FakeConnector {
    world: Arc<Mutex<World>>,
}

impl RuntimeConnector for FakeConnector {
    fn connect(&self) -> Result<Box<dyn ContainerRuntime>, RuntimeError> {
        self.world.lock().unwrap().connects += 1;
        Ok(Box::new(FakeRuntime {
            world: Arc::clone(&self.world),
        }))
    }
}

struct FakeRuntime {
    world: Arc<Mutex<World>>,
}

impl FakeRuntime {
    fn update(&self, id: &str, running: bool, pid: u32, status: &str) -> Result<(), RuntimeError> {
        let mut world = self.world.lock().unwrap();
        let index = world.find(id).ok_or_else(|| RuntimeError::CommandFailed {
            operation: "update",
            id: id.to_string(),
            stderr: "No such container".to_string(),
        })?;
        let container = &mut world.containers[index];
        container.running = running;
        container.pid = pid;
        container.status = status.to_string();
        Ok(())
    }
}

impl ContainerRuntime for FakeRuntime {
    fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError> {
        Ok(self.world.lock().unwrap().container(id).cloned())
    }

    fn stop(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.world.lock().unwrap().ops.push(format!("stop {}", id));
        self.update(id, false, 0, "exited")
    }

    fn remove(&self, id: &str, _force: bool) -> Result<(), RuntimeError> {
        let mut world = self.world.lock().unwrap();
        world.ops.push(format!("remove {}", id));
        world.containers.retain(|c| c.id != id && c.name != id);
        Ok(())
    }

    fn create(&self, image: &str, name: &str, command: &[String]) -> Result<String, RuntimeError> {
        let mut world = self.world.lock().unwrap();
        world
            .ops
            .push(format!("create {} {} {}", image, name, command.join(" ")));
        let id = format!("new-{}", name);
        world.containers.push(ContainerState {
            id: id.clone(),
            name: name.to_string(),
            image: image.to_string(),
            running: false,
            pid: 0,
            status: "created".to_string(),
        });
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let pid = {
            let mut world = self.world.lock().unwrap();
            world.ops.push(format!("start {}", id));
            world.next_pid += 1;
            4000 + world.next_pid
        };
        self.update(id, true, pid, "running")
    }

    fn checkpoint(
        &self,
        id: &str,
        name: &str,
        dir: &Path,
        leave_running: bool,
    ) -> Result<(), RuntimeError> {
        fs::create_dir_all(dir.join(name)).unwrap();
        self.world
            .lock()
            .unwrap()
            .ops
            .push(format!("checkpoint {} {} leave_running={}", id, name, leave_running));
        Ok(())
    }

    fn start_from_checkpoint(&self, id: &str, name: &str, dir: &Path) -> Result<(), RuntimeError> {
        assert!(dir.join(name).is_dir(), "runtime checkpoint missing");
        self.world
            .lock()
            .unwrap()
            .ops
            .push(format!("start-checkpoint {} {}", id, name));
        self.update(id, true, 5150, "running")
    }
}

// =============================================================================
// Scripted checkpoint engine
// =============================================================================

#[derive(Default)]
struct EngineCalls {
    dumps: Vec<SnapshotOptions>,
    restores: Vec<SnapshotOptions>,
}

#[derive(Clone)]
struct FakeEngine {
    available: bool,
    /// Dumps using these log files fail.
    failing_logs: Vec<&'static str>,
    fail_restore: bool,
    /// A failed dump leaves the target a zombie.
    zombify_on_failure: bool,
    proc_root: PathBuf,
    restored_pid: u32,
    /// Container marked running once the engine restores into it.
    revive: Option<(Arc<Mutex<World>>, String)>,
    calls: Arc<Mutex<EngineCalls>>,
}

impl FakeEngine {
    fn new(proc_root: &Path) -> Self {
        Self {
            available: true,
            failing_logs: Vec::new(),
            fail_restore: false,
            zombify_on_failure: false,
            proc_root: proc_root.to_path_buf(),
            restored_pid: 7001,
            revive: None,
            calls: Arc::new(Mutex::new(EngineCalls::default())),
        }
    }

    fn dump_logs(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .dumps
            .iter()
            .map(|o| o.log_file)
            .collect()
    }
}

impl CheckpointEngine for FakeEngine {
    fn version(&self) -> Result<EngineVersion, EngineFailure> {
        if !self.available {
            return Err(EngineFailure::new("criu binary not found", ""));
        }
        Ok(EngineVersion {
            major: 3,
            minor: 19,
            raw: "Version: 3.19".to_string(),
        })
    }

    fn dump(
        &self,
        options: &SnapshotOptions,
        callbacks: &mut dyn LifecycleCallbacks,
    ) -> Result<(), EngineFailure> {
        callbacks
            .pre_dump()
            .map_err(|e| EngineFailure::callback("pre-dump", e))?;
        self.calls.lock().unwrap().dumps.push(options.clone());

        if self.failing_logs.contains(&options.log_file) {
            let log = format!(
                "(00.012) Error (criu/mount.c:1088): mnt: {} cannot handle mounts\n",
                options.log_file
            );
            fs::write(options.log_path(), &log).unwrap();
            fs::write(options.images_dir.join("pages-1.img"), b"partial").unwrap();
            if self.zombify_on_failure {
                if let Some(pid) = options.pid {
                    fake_process(&self.proc_root, pid.value(), 'Z', false);
                }
            }
            return Err(EngineFailure::new(
                format!("criu dump failed: {}", options.log_file),
                log,
            ));
        }

        fs::write(options.images_dir.join("pstree.img"), b"tree").unwrap();
        fs::write(options.log_path(), "(00.100) Dumping finished successfully\n").unwrap();
        callbacks
            .post_dump()
            .map_err(|e| EngineFailure::callback("post-dump", e))
    }

    fn restore(
        &self,
        options: &SnapshotOptions,
        callbacks: &mut dyn LifecycleCallbacks,
    ) -> Result<ProcessId, EngineFailure> {
        self.calls.lock().unwrap().restores.push(options.clone());
        assert!(
            options.images_dir.join("pstree.img").exists(),
            "restore pointed at a directory without images"
        );

        if self.fail_restore {
            return Err(EngineFailure::new(
                "criu restore failed",
                "(00.200) Error (criu/cr-restore.c:2511): Restoring FAILED.",
            ));
        }

        fake_process(&self.proc_root, self.restored_pid, 'S', false);
        if let Some((world, name)) = &self.revive {
            let mut world = world.lock().unwrap();
            if let Some(index) = world.find(name) {
                let container = &mut world.containers[index];
                container.running = true;
                container.pid = self.restored_pid;
                container.status = "running".to_string();
            }
        }

        let pid = ProcessId::new(self.restored_pid).unwrap();
        callbacks
            .setup_namespaces(pid.value())
            .map_err(|e| EngineFailure::callback("setup-namespaces", e))?;
        callbacks
            .post_restore(pid.value())
            .map_err(|e| EngineFailure::callback("post-restore", e))?;
        Ok(pid)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

struct Fixture {
    root: TempDir,
    proc_root: PathBuf,
    destination: PathBuf,
    config: Config,
    world: Arc<Mutex<World>>,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let proc_root = root.path().join("proc");
        fs::create_dir_all(&proc_root).unwrap();

        let mut config = Config::default();
        config.proc_root = proc_root.clone();
        config.lock_dir = root.path().join("locks");
        config.verify.attempts = 3;
        config.verify.backoff = Duration::from_millis(1);

        Self {
            destination: root.path().join("checkpoints"),
            root,
            proc_root,
            config,
            world: Arc::new(Mutex::new(World::default())),
        }
    }

    fn with_web_container(self, tcp: bool) -> Self {
        fake_process(&self.proc_root, 4312, 'S', tcp);
        self.world
            .lock()
            .unwrap()
            .containers
            .push(running_container("3f4e8a1c9b2d", "web", "nginx:1.25", 4312));
        self
    }

    /// Write a shell hook script into the fixture directory.
    fn hook(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn engine(&self) -> FakeEngine {
        FakeEngine::new(&self.proc_root)
    }

    fn connector(&self) -> FakeConnector {
        FakeConnector {
            world: Arc::clone(&self.world),
        }
    }

    fn checkpointer(
        &self,
        engine: &FakeEngine,
    ) -> CheckpointOrchestrator<FakeEngine, FakeConnector> {
        CheckpointOrchestrator::new(&self.config, engine.clone(), self.connector())
    }

    fn restorer(&self, engine: &FakeEngine) -> RestoreOrchestrator<FakeEngine, FakeConnector> {
        RestoreOrchestrator::new(&self.config, engine.clone(), self.connector())
    }

    fn ops(&self) -> Vec<String> {
        self.world.lock().unwrap().ops.clone()
    }

    fn connects(&self) -> usize {
        self.world.lock().unwrap().connects
    }
}

fn container(name: &str) -> TargetSpec {
    TargetSpec::Container(ContainerRef::new(name).unwrap())
}

fn process(pid: u32) -> TargetSpec {
    TargetSpec::Process(ProcessId::new(pid).unwrap())
}

// =============================================================================
// Checkpoint
// =============================================================================

#[test]
fn test_zombie_refused_before_any_attempt() {
    let mut fixture = Fixture::new();
    fake_process(&fixture.proc_root, 300, 'Z', false);

    for chain in [
        vec![Strategy::DirectMinimal],
        vec![Strategy::DirectContainerAware, Strategy::DirectMinimal],
    ] {
        fixture.config.strategies.process = chain;
        let engine = fixture.engine();
        let err = fixture
            .checkpointer(&engine)
            .checkpoint(&CheckpointRequest::new(process(300), &fixture.destination))
            .unwrap_err();

        assert!(matches!(
            err,
            StasisError::Precondition(PreconditionError::ZombieProcess { .. })
        ));
        assert!(engine.dump_logs().is_empty());
        assert!(!fixture.destination.exists());
    }
}

#[test]
fn test_vanished_pid_creates_nothing() {
    let fixture = Fixture::new();
    let engine = fixture.engine();

    let err = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(process(4242), &fixture.destination))
        .unwrap_err();

    assert!(matches!(
        err,
        StasisError::Precondition(PreconditionError::TargetNotFound { .. })
    ));
    assert!(!fixture.destination.exists());
    assert!(engine.dump_logs().is_empty());
}

#[test]
fn test_engine_unavailable_is_fatal() {
    let fixture = Fixture::new().with_web_container(false);
    let mut engine = fixture.engine();
    engine.available = false;

    let err = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap_err();

    assert!(matches!(err, StasisError::EngineUnavailable { .. }));
    assert!(engine.dump_logs().is_empty());
    assert_eq!(fixture.connects(), 0);
    assert!(!fixture.destination.exists());
}

#[test]
fn test_container_must_exist_and_run() {
    let fixture = Fixture::new().with_web_container(false);
    fixture
        .world
        .lock()
        .unwrap()
        .containers
        .push(ContainerState {
            running: false,
            pid: 0,
            status: "exited".to_string(),
            ..running_container("9a9a9a", "db", "redis:7", 0)
        });
    let engine = fixture.engine();
    let checkpointer = fixture.checkpointer(&engine);

    let missing = checkpointer
        .checkpoint(&CheckpointRequest::new(container("ghost"), &fixture.destination))
        .unwrap_err();
    assert!(matches!(
        missing,
        StasisError::Precondition(PreconditionError::ContainerNotFound { .. })
    ));

    let stopped = checkpointer
        .checkpoint(&CheckpointRequest::new(container("db"), &fixture.destination))
        .unwrap_err();
    match stopped {
        StasisError::Precondition(PreconditionError::TargetNotRunning { state, .. }) => {
            assert_eq!(state, "exited")
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!fixture.destination.exists());
}

#[test]
fn test_tcp_handling_enabled_for_every_direct_strategy() {
    let fixture = Fixture::new().with_web_container(true);
    let mut engine = fixture.engine();
    engine.failing_logs = vec![CONTAINER_DUMP_LOG];

    let report = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();

    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls.dumps.len(), 2);
    assert!(calls.dumps.iter().all(|o| o.flags.tcp_established));
    assert!(report.record.flags.tcp_established);
}

#[test]
fn test_fallback_runs_each_strategy_once_in_order() {
    let fixture = Fixture::new().with_web_container(false);
    let mut engine = fixture.engine();
    engine.failing_logs = vec![CONTAINER_DUMP_LOG];

    let report = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();

    assert_eq!(engine.dump_logs(), vec![CONTAINER_DUMP_LOG, MINIMAL_DUMP_LOG]);
    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(
        &report.outcomes[0],
        StrategyOutcome::Failed { strategy: Strategy::DirectContainerAware, .. }
    ));
    assert!(matches!(
        report.outcomes[1],
        StrategyOutcome::Succeeded(Strategy::DirectMinimal)
    ));
    assert_eq!(report.record.strategy, Strategy::DirectMinimal);

    // The failed attempt's partial images are gone; its log stays.
    let generation = report.record_path.parent().unwrap();
    assert!(!generation.join("pages-1.img").exists());
    assert!(generation.join("pstree.img").exists());
    assert!(generation.join(CONTAINER_DUMP_LOG).exists());
}

#[test]
fn test_exhausted_chain_reports_every_outcome() {
    let fixture = Fixture::new().with_web_container(false);
    let mut engine = fixture.engine();
    engine.failing_logs = vec![CONTAINER_DUMP_LOG, MINIMAL_DUMP_LOG];

    let err = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap_err();

    match &err {
        StasisError::CheckpointExhausted { target, outcomes } => {
            assert!(target.contains("web"));
            let strategies: Vec<Strategy> = outcomes.iter().map(|o| o.strategy()).collect();
            assert_eq!(
                strategies,
                vec![Strategy::DirectContainerAware, Strategy::DirectMinimal]
            );
            assert!(outcomes.iter().all(|o| !o.is_success()));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.engine_diagnostic().unwrap().contains(MINIMAL_DUMP_LOG));
    assert_eq!(engine.dump_logs().len(), 2);

    // Nothing restorable was left behind.
    assert!(!fixture.destination.join(LATEST_FILE).exists());
    assert!(matches!(
        MetadataStore::load(&fixture.destination),
        Err(StasisError::MissingMetadata { .. })
    ));
}

#[test]
fn test_profile_refreshed_between_attempts() {
    let fixture = Fixture::new().with_web_container(false);
    let mut engine = fixture.engine();
    engine.failing_logs = vec![CONTAINER_DUMP_LOG];
    engine.zombify_on_failure = true;

    let err = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap_err();

    // The second strategy sees the process as it is now, not as first probed.
    assert!(matches!(
        err,
        StasisError::Precondition(PreconditionError::ZombieProcess { .. })
    ));
    assert_eq!(engine.dump_logs(), vec![CONTAINER_DUMP_LOG]);
}

#[test]
fn test_relocate_stops_source() {
    let fixture = Fixture::new();
    fake_process(&fixture.proc_root, 812, 'R', false);
    let engine = fixture.engine();
    let checkpointer = fixture.checkpointer(&engine);

    checkpointer
        .checkpoint(&CheckpointRequest::new(process(812), &fixture.destination))
        .unwrap();
    checkpointer
        .checkpoint(&CheckpointRequest::new(process(812), &fixture.destination).relocate())
        .unwrap();

    let calls = engine.calls.lock().unwrap();
    assert!(calls.dumps[0].leave_running);
    assert!(!calls.dumps[1].leave_running);
}

#[test]
fn test_checkpoints_into_same_destination_are_independent() {
    let fixture = Fixture::new();
    fake_process(&fixture.proc_root, 812, 'S', false);
    let engine = fixture.engine();
    let checkpointer = fixture.checkpointer(&engine);
    let request = CheckpointRequest::new(process(812), &fixture.destination);

    let first = checkpointer.checkpoint(&request).unwrap();
    let second = checkpointer.checkpoint(&request).unwrap();

    assert_ne!(first.record.record_id, second.record.record_id);
    assert_ne!(first.record_path, second.record_path);

    let first_dir = first.record_path.parent().unwrap();
    let second_dir = second.record_path.parent().unwrap();
    assert_eq!(MetadataStore::load(first_dir).unwrap().record, first.record);
    assert_eq!(MetadataStore::load(second_dir).unwrap().record, second.record);
    assert_eq!(
        MetadataStore::load(&fixture.destination).unwrap().record,
        second.record
    );
}

#[test]
fn test_concurrent_checkpoint_is_busy() {
    let fixture = Fixture::new();
    fake_process(&fixture.proc_root, 812, 'S', false);
    let engine = fixture.engine();
    let locks = TargetLocks::new(fixture.config.lock_dir.clone());
    let checkpointer = fixture.checkpointer(&engine).with_locks(locks.clone());

    let _held = locks.acquire("pid-812").unwrap();
    let err = checkpointer
        .checkpoint(&CheckpointRequest::new(process(812), &fixture.destination))
        .unwrap_err();

    assert!(matches!(err, StasisError::TargetBusy { .. }));
    assert!(engine.dump_logs().is_empty());
}

#[test]
fn test_separate_orchestrators_exclude_each_other() {
    let fixture = Fixture::new().with_web_container(false);
    let engine = fixture.engine();

    // Another stasis process with its own registry holds the container.
    let other = TargetLocks::new(fixture.config.lock_dir.clone());
    let held = other.acquire("container-web").unwrap();

    let err = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap_err();
    assert!(matches!(err, StasisError::TargetBusy { .. }));
    assert!(engine.dump_logs().is_empty());

    drop(held);
    assert!(fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .is_ok());
}

#[test]
fn test_default_config_locks_across_registries() {
    let config = Config::default();
    let key = format!("container-default-lock-{}", std::process::id());
    let first = TargetLocks::new(config.lock_dir.clone());
    let second = TargetLocks::new(config.lock_dir.clone());

    let guard = first.acquire(&key).unwrap();
    assert!(matches!(
        second.acquire(&key),
        Err(StasisError::TargetBusy { .. })
    ));

    drop(guard);
    assert!(second.acquire(&key).is_ok());
}

#[test]
fn test_failing_capture_hook_falls_back_to_next_strategy() {
    let mut fixture = Fixture::new().with_web_container(false);
    let marker = fixture.root.path().join("pre-dump-ran");
    let script = fixture.hook(
        "pre-dump.sh",
        &format!(
            "if [ -f {0} ]; then exit 0; fi\ntouch {0}\nexit 3\n",
            marker.display()
        ),
    );
    fixture.config.hooks.pre_dump = Some(script);
    let engine = fixture.engine();

    let report = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();

    assert_eq!(report.record.strategy, Strategy::DirectMinimal);
    assert_eq!(report.outcomes.len(), 2);
    let failure = report.outcomes[0].failure().unwrap();
    assert_eq!(report.outcomes[0].strategy(), Strategy::DirectContainerAware);
    assert!(failure.reason.contains("pre-dump callback failed"));
    assert!(report.outcomes[1].is_success());
    // The failing hook stopped the first attempt before the engine ran.
    assert_eq!(engine.dump_logs(), vec![MINIMAL_DUMP_LOG]);
}

#[test]
fn test_delegate_only_chain_needs_no_engine() {
    let mut fixture = Fixture::new().with_web_container(false);
    fixture.config.strategies.container = vec![Strategy::ContainerNativeDelegate];
    let mut engine = fixture.engine();
    engine.available = false;

    let report = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();

    assert_eq!(report.record.strategy, Strategy::ContainerNativeDelegate);
    assert!(engine.dump_logs().is_empty());

    // A direct strategy anywhere in the chain still requires the engine.
    fixture.config.strategies.container =
        vec![Strategy::ContainerNativeDelegate, Strategy::DirectMinimal];
    let err = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap_err();
    assert!(matches!(err, StasisError::EngineUnavailable { .. }));
}

// =============================================================================
// Restore
// =============================================================================

#[test]
fn test_record_round_trip_into_restore() {
    let fixture = Fixture::new().with_web_container(true);
    let mut engine = fixture.engine();
    engine.revive = Some((Arc::clone(&fixture.world), "web".to_string()));

    let checkpoint = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();
    assert_eq!(checkpoint.record.strategy, Strategy::DirectContainerAware);

    let loaded = MetadataStore::load(&fixture.destination).unwrap();
    assert_eq!(loaded.record.strategy, checkpoint.record.strategy);
    assert_eq!(loaded.record.pid.value(), 4312);
    let identity = loaded.record.container.as_ref().unwrap();
    assert_eq!(identity.name.as_str(), "web");
    assert_eq!(identity.image, "nginx:1.25");

    let report = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap();

    assert_eq!(report.record.strategy, Strategy::DirectContainerAware);
    assert_eq!(report.pid.value(), 7001);
    assert!(report.checks <= fixture.config.verify.attempts);
    assert_eq!(report.container.as_deref(), Some("3f4e8a1c9b2d"));

    // The running source was stopped before replay, and options mirror the dump.
    assert_eq!(fixture.ops(), vec!["stop 3f4e8a1c9b2d".to_string()]);
    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls.restores.len(), 1);
    assert_eq!(calls.restores[0].flags, calls.dumps[0].flags);
    assert_eq!(calls.restores[0].skip_mounts, calls.dumps[0].skip_mounts);
    assert!(calls.restores[0].restore_detached);
}

#[test]
fn test_restore_without_metadata_touches_nothing() {
    let fixture = Fixture::new().with_web_container(false);
    fs::create_dir_all(&fixture.destination).unwrap();
    let engine = fixture.engine();

    let err = fixture
        .restorer(&engine)
        .restore(
            &RestoreRequest::new(&fixture.destination)
                .into_container(ContainerRef::new("web").unwrap()),
        )
        .unwrap_err();

    assert!(matches!(err, StasisError::MissingMetadata { .. }));
    assert_eq!(fixture.connects(), 0);
    assert!(fixture.ops().is_empty());
    assert!(engine.calls.lock().unwrap().restores.is_empty());
}

#[test]
fn test_legacy_record_is_not_guessed() {
    let fixture = Fixture::new().with_web_container(false);
    fs::create_dir_all(&fixture.destination).unwrap();
    fs::write(
        fixture.destination.join(RECORD_FILE),
        "CONTAINER_ID=3f4e8a1c9b2d\nCONTAINER_NAME=web\nIMAGE=nginx:1.25\nPID=4312\n",
    )
    .unwrap();
    let engine = fixture.engine();

    let err = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap_err();

    assert!(matches!(
        err,
        StasisError::Metadata(MetadataError::MissingField { field: "STRATEGY" })
    ));
    assert_eq!(fixture.connects(), 0);
}

#[test]
fn test_restore_recreates_absent_container() {
    let fixture = Fixture::new().with_web_container(false);
    let mut engine = fixture.engine();
    engine.revive = Some((Arc::clone(&fixture.world), "web".to_string()));

    fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination).relocate())
        .unwrap();
    fixture.world.lock().unwrap().containers.clear();

    let report = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap();

    assert_eq!(
        fixture.ops(),
        vec![
            "create nginx:1.25 web sleep infinity".to_string(),
            "start new-web".to_string(),
            "stop new-web".to_string(),
        ]
    );
    assert_eq!(report.container.as_deref(), Some("new-web"));
    assert_eq!(report.pid.value(), 7001);
}

#[test]
fn test_restore_reuses_stopped_container() {
    let fixture = Fixture::new().with_web_container(false);
    let mut engine = fixture.engine();
    engine.revive = Some((Arc::clone(&fixture.world), "web".to_string()));

    fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();
    {
        let mut world = fixture.world.lock().unwrap();
        let web = &mut world.containers[0];
        web.running = false;
        web.pid = 0;
        web.status = "exited".to_string();
    }

    fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap();
    assert!(fixture.ops().is_empty());
}

#[test]
fn test_restore_replaces_container_from_other_image() {
    let fixture = Fixture::new().with_web_container(false);
    let mut engine = fixture.engine();
    engine.revive = Some((Arc::clone(&fixture.world), "web".to_string()));

    fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();
    fixture.world.lock().unwrap().containers[0].image = "nginx:1.24".to_string();

    let report = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap();

    assert_eq!(
        fixture.ops(),
        vec![
            "stop 3f4e8a1c9b2d".to_string(),
            "remove 3f4e8a1c9b2d".to_string(),
            "create nginx:1.25 web sleep infinity".to_string(),
            "start new-web".to_string(),
            "stop new-web".to_string(),
        ]
    );
    assert_eq!(report.container.as_deref(), Some("new-web"));
}

#[test]
fn test_failing_restore_hook_is_terminal() {
    let mut fixture = Fixture::new().with_web_container(false);
    let engine = fixture.engine();

    fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();

    let script = fixture.hook("post-restore.sh", "exit 1\n");
    fixture.config.hooks.post_restore = Some(script);
    let err = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap_err();

    match &err {
        StasisError::RestoreFailed { strategy, failure } => {
            assert_eq!(*strategy, Strategy::DirectContainerAware);
            assert!(failure.reason.contains("post-restore callback failed"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(engine.calls.lock().unwrap().restores.len(), 1);
}

#[test]
fn test_restore_failure_has_no_fallback() {
    let fixture = Fixture::new().with_web_container(false);
    let mut engine = fixture.engine();

    fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();

    engine.fail_restore = true;
    let err = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap_err();

    match &err {
        StasisError::RestoreFailed { strategy, .. } => {
            assert_eq!(*strategy, Strategy::DirectContainerAware)
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.engine_diagnostic().unwrap().contains("Restoring FAILED"));
    assert_eq!(engine.calls.lock().unwrap().restores.len(), 1);
}

#[test]
fn test_restore_not_seen_live_is_unverified() {
    let fixture = Fixture::new().with_web_container(false);
    let engine = fixture.engine();

    fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();

    let err = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap_err();

    match err {
        StasisError::RestoreUnverified {
            attempts,
            last_state,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert!(last_state.contains("exited"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_bare_process_restores_in_place() {
    let fixture = Fixture::new();
    fake_process(&fixture.proc_root, 812, 'S', true);
    let engine = fixture.engine();

    let checkpoint = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(process(812), &fixture.destination))
        .unwrap();
    assert!(checkpoint.record.container.is_none());
    assert!(checkpoint.record.flags.tcp_established);

    let report = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(checkpoint.record_path.parent().unwrap()))
        .unwrap();

    assert_eq!(report.pid.value(), 7001);
    assert!(report.container.is_none());
    assert_eq!(fixture.connects(), 0);
}

#[test]
fn test_delegated_checkpoint_and_restore() {
    let mut fixture = Fixture::new().with_web_container(false);
    fixture.config.strategies.container = vec![Strategy::ContainerNativeDelegate];
    let engine = fixture.engine();

    let checkpoint = fixture
        .checkpointer(&engine)
        .checkpoint(&CheckpointRequest::new(container("web"), &fixture.destination))
        .unwrap();

    let name = checkpoint.record.checkpoint_name.clone().unwrap();
    assert_eq!(checkpoint.record.strategy, Strategy::ContainerNativeDelegate);
    assert!(engine.dump_logs().is_empty());
    assert_eq!(
        fixture.ops(),
        vec![format!("checkpoint 3f4e8a1c9b2d {} leave_running=true", name)]
    );

    let report = fixture
        .restorer(&engine)
        .restore(&RestoreRequest::new(&fixture.destination))
        .unwrap();

    assert_eq!(report.pid.value(), 5150);
    assert!(fixture
        .ops()
        .contains(&format!("start-checkpoint 3f4e8a1c9b2d {}", name)));
    assert!(engine.calls.lock().unwrap().restores.is_empty());
}
