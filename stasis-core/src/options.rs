// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Snapshot option building.
//!
//! Maps a capability profile and a strategy onto the option set handed to
//! the checkpoint engine. Each strategy is a pure function of its inputs;
//! the orchestrator owns the order in which strategies are tried.

use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::criu::ImagesDir;
use crate::probe::CapabilityProfile;
use crate::types::{ProcessId, Strategy};

/// Dump log for the container-aware strategy.
pub const CONTAINER_DUMP_LOG: &str = "criu-dump.log";
/// Dump log for the minimal strategy.
pub const MINIMAL_DUMP_LOG: &str = "dump.log";
/// Restore log for the container-aware strategy.
pub const CONTAINER_RESTORE_LOG: &str = "criu-restore.log";
/// Restore log for the minimal strategy.
pub const MINIMAL_RESTORE_LOG: &str = "restore.log";
/// File the engine writes the restored root pid into.
pub const RESTORED_PIDFILE: &str = "restored.pid";

/// Bind mounts the container runtime manages itself.
pub const RUNTIME_MANAGED_MOUNTS: &[&str] = &[
    "/etc/resolv.conf",
    "/etc/hostname",
    "/etc/hosts",
    "/dev/mqueue",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

/// Filesystem types the engine may traverse inside a container.
pub const CONTAINER_FILESYSTEMS: &[&str] = &["overlay", "proc", "sysfs", "devtmpfs", "tmpfs"];

/// How the engine treats cgroups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupMode {
    /// Runtime keeps authority; engine leaves cgroups alone.
    Ignore,
}

impl CgroupMode {
    /// Value for the engine's `--manage-cgroups` option.
    pub const fn engine_value(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
        }
    }
}

/// Per-resource-class handling flags.
///
/// `false` means "engine default", which for every class here is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceFlags {
    pub tcp_established: bool,
    pub ext_unix_sk: bool,
    pub file_locks: bool,
    pub shell_job: bool,
    pub orphan_pts_master: bool,
}

impl ResourceFlags {
    /// Every class the profile reports present is enabled.
    pub fn covers(&self, profile: &CapabilityProfile) -> bool {
        (!profile.has_established_tcp || self.tcp_established)
            && (!profile.has_unix_sockets || self.ext_unix_sk)
    }

    /// Only what the profile needs.
    fn minimal(profile: &CapabilityProfile) -> Self {
        Self {
            tcp_established: profile.has_established_tcp,
            ext_unix_sk: profile.has_unix_sockets,
            file_locks: false,
            shell_job: profile.is_shell_job,
            orphan_pts_master: false,
        }
    }

    /// Full handling for container workloads.
    fn container_aware(profile: &CapabilityProfile) -> Self {
        Self {
            tcp_established: true,
            ext_unix_sk: true,
            file_locks: true,
            shell_job: profile.is_shell_job,
            orphan_pts_master: true,
        }
    }
}

/// Full configuration handed to the checkpoint engine for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Tree root to dump; unset for restores.
    pub pid: Option<ProcessId>,
    /// Real path of the images directory.
    pub images_dir: PathBuf,
    /// Path through the held directory handle; this is what the engine opens.
    pub images_handle: PathBuf,
    pub log_file: &'static str,
    pub log_level: u32,
    pub leave_running: bool,
    pub flags: ResourceFlags,
    /// Unset leaves the engine default.
    pub cgroup_mode: Option<CgroupMode>,
    pub skip_mounts: Vec<String>,
    pub enable_fs: Vec<String>,
    /// Unset leaves the engine default.
    pub ghost_limit: Option<u32>,
    /// Restore as an independent process, not a child of the orchestrator.
    pub restore_detached: bool,
    pub pidfile: Option<&'static str>,
}

impl SnapshotOptions {
    fn base(images: &ImagesDir, log_file: &'static str, log_level: u32) -> Self {
        Self {
            pid: None,
            images_dir: images.path().to_path_buf(),
            images_handle: images.engine_path(),
            log_file,
            log_level,
            leave_running: false,
            flags: ResourceFlags::default(),
            cgroup_mode: None,
            skip_mounts: Vec::new(),
            enable_fs: Vec::new(),
            ghost_limit: None,
            restore_detached: false,
            pidfile: None,
        }
    }

    fn with_container_exclusions(mut self) -> Self {
        self.cgroup_mode = Some(CgroupMode::Ignore);
        self.skip_mounts = RUNTIME_MANAGED_MOUNTS.iter().map(|m| m.to_string()).collect();
        self.enable_fs = CONTAINER_FILESYSTEMS.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Real path of this invocation's log file.
    pub fn log_path(&self) -> PathBuf {
        self.images_dir.join(self.log_file)
    }
}

/// What an attempt with a given strategy should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotPlan {
    /// Invoke the engine directly with these options.
    Direct(SnapshotOptions),
    /// Hand the operation to the container runtime.
    Delegate,
}

/// Builds engine options from profiles and strategies.
#[derive(Debug, Clone, Copy)]
pub struct OptionBuilder {
    log_level: u32,
    ghost_limit: u32,
}

impl OptionBuilder {
    pub fn new(engine: &EngineConfig) -> Self {
        Self {
            log_level: engine.log_level,
            ghost_limit: engine.ghost_limit_bytes,
        }
    }

    /// Options for dumping `profile` with `strategy` into `destination`.
    pub fn build(
        &self,
        profile: &CapabilityProfile,
        strategy: Strategy,
        destination: &ImagesDir,
        leave_running: bool,
    ) -> SnapshotPlan {
        let options = match strategy {
            Strategy::ContainerNativeDelegate => return SnapshotPlan::Delegate,
            Strategy::DirectMinimal => SnapshotOptions {
                flags: ResourceFlags::minimal(profile),
                ..SnapshotOptions::base(destination, MINIMAL_DUMP_LOG, self.log_level)
            },
            Strategy::DirectContainerAware => SnapshotOptions {
                flags: ResourceFlags::container_aware(profile),
                ghost_limit: Some(self.ghost_limit),
                ..SnapshotOptions::base(destination, CONTAINER_DUMP_LOG, self.log_level)
            }
            .with_container_exclusions(),
        };

        SnapshotPlan::Direct(SnapshotOptions {
            pid: Some(profile.pid),
            leave_running,
            ..options
        })
    }

    /// Options for restoring a checkpoint taken with `strategy` and `flags`.
    ///
    /// Mirrors the dump: same exclusions and resource flags, plus detached
    /// restore with a pidfile.
    pub fn restore(
        &self,
        strategy: Strategy,
        flags: ResourceFlags,
        destination: &ImagesDir,
    ) -> SnapshotPlan {
        let options = match strategy {
            Strategy::ContainerNativeDelegate => return SnapshotPlan::Delegate,
            Strategy::DirectMinimal => {
                SnapshotOptions::base(destination, MINIMAL_RESTORE_LOG, self.log_level)
            }
            Strategy::DirectContainerAware => {
                SnapshotOptions::base(destination, CONTAINER_RESTORE_LOG, self.log_level)
                    .with_container_exclusions()
            }
        };

        SnapshotPlan::Direct(SnapshotOptions {
            flags,
            restore_detached: true,
            pidfile: Some(RESTORED_PIDFILE),
            ..options
        })
    }
}
