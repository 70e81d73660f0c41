// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CRIU command-line driver.
//!
//! Runs the `criu` binary per invocation. Failures carry the engine's log
//! file (or stderr when no log was written) as the diagnostic.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Instant;

use crate::callbacks::LifecycleCallbacks;
use crate::config::EngineConfig;
use crate::error::EngineFailure;
use crate::options::SnapshotOptions;
use crate::types::ProcessId;

use super::{CheckpointEngine, EngineVersion};

/// Standard install locations searched when no binary is configured.
const CRIU_CANDIDATES: &[&str] = &[
    "/usr/sbin/criu",
    "/usr/bin/criu",
    "/sbin/criu",
    "/bin/criu",
    "/usr/local/sbin/criu",
    "/usr/local/bin/criu",
];

/// Checkpoint engine backed by the `criu` binary.
#[derive(Debug)]
pub struct CriuCli {
    configured: Option<PathBuf>,
    binary: OnceLock<PathBuf>,
}

impl CriuCli {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            configured: config.binary.clone(),
            binary: OnceLock::new(),
        }
    }

    /// Resolve the binary once and remember it.
    fn binary(&self) -> Result<&Path, EngineFailure> {
        if let Some(path) = self.binary.get() {
            return Ok(path);
        }
        let found = find_criu(self.configured.as_deref())?;
        Ok(self.binary.get_or_init(|| found))
    }

    fn run(
        &self,
        action: &'static str,
        args: Vec<OsString>,
        options: &SnapshotOptions,
    ) -> Result<(), EngineFailure> {
        let binary = self.binary()?;

        tracing::debug!(
            action,
            binary = %binary.display(),
            images = %options.images_dir.display(),
            args = ?args,
            "Invoking CRIU"
        );

        let start = Instant::now();
        let output = Command::new(binary)
            .args(&args)
            .output()
            .map_err(|e| EngineFailure::new(format!("failed to execute criu: {}", e), ""))?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            let diagnostic = match std::fs::read_to_string(options.log_path()) {
                Ok(log) if !log.trim().is_empty() => log,
                _ => String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            let reason = summarize(&diagnostic)
                .map(|line| format!("criu {} failed: {}", action, line))
                .unwrap_or_else(|| format!("criu {} exited with {}", action, output.status));

            tracing::warn!(action, elapsed_ms, reason = %reason, "CRIU invocation failed");
            return Err(EngineFailure::new(reason, diagnostic));
        }

        tracing::info!(action, elapsed_ms, "CRIU invocation completed");
        Ok(())
    }
}

impl CheckpointEngine for CriuCli {
    fn version(&self) -> Result<EngineVersion, EngineFailure> {
        let binary = self.binary()?;
        let output = Command::new(binary)
            .arg("--version")
            .output()
            .map_err(|e| EngineFailure::new(format!("failed to execute criu: {}", e), ""))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(EngineFailure::new(
                format!("criu --version exited with {}", output.status),
                String::from_utf8_lossy(&output.stderr),
            ));
        }

        let (major, minor) = parse_version(&stdout).ok_or_else(|| {
            EngineFailure::new("unrecognised criu --version output", stdout.trim())
        })?;

        Ok(EngineVersion {
            major,
            minor,
            raw: stdout.trim().to_string(),
        })
    }

    fn dump(
        &self,
        options: &SnapshotOptions,
        callbacks: &mut dyn LifecycleCallbacks,
    ) -> Result<(), EngineFailure> {
        let args = dump_args(options)?;

        callbacks
            .pre_dump()
            .map_err(|e| EngineFailure::callback("pre-dump", e))?;
        if options.flags.tcp_established {
            callbacks
                .network_lock()
                .map_err(|e| EngineFailure::callback("network-lock", e))?;
        }

        let result = self.run("dump", args, options);

        if options.flags.tcp_established {
            callbacks
                .network_unlock()
                .map_err(|e| EngineFailure::callback("network-unlock", e))?;
        }
        result?;

        callbacks
            .post_dump()
            .map_err(|e| EngineFailure::callback("post-dump", e))
    }

    fn restore(
        &self,
        options: &SnapshotOptions,
        callbacks: &mut dyn LifecycleCallbacks,
    ) -> Result<ProcessId, EngineFailure> {
        callbacks
            .pre_restore()
            .map_err(|e| EngineFailure::callback("pre-restore", e))?;

        self.run("restore", restore_args(options), options)?;

        let pidfile = options
            .pidfile
            .ok_or_else(|| EngineFailure::new("restore finished without a pidfile", ""))?;
        let pid = read_pidfile(&options.images_dir.join(pidfile))?;

        callbacks
            .setup_namespaces(pid.value())
            .map_err(|e| EngineFailure::callback("setup-namespaces", e))?;
        callbacks
            .post_setup_namespaces()
            .map_err(|e| EngineFailure::callback("post-setup-namespaces", e))?;
        callbacks
            .post_restore(pid.value())
            .map_err(|e| EngineFailure::callback("post-restore", e))?;
        callbacks
            .post_resume()
            .map_err(|e| EngineFailure::callback("post-resume", e))?;

        Ok(pid)
    }
}

/// Find the CRIU binary.
fn find_criu(configured: Option<&Path>) -> Result<PathBuf, EngineFailure> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(EngineFailure::new(
            format!("configured criu binary {} does not exist", path.display()),
            "",
        ));
    }

    for path in CRIU_CANDIDATES {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    if let Ok(output) = Command::new("which").arg("criu").output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }

    Err(EngineFailure::new("criu binary not found", ""))
}

/// Parse `Version: 3.19` style output into major and minor.
fn parse_version(output: &str) -> Option<(u32, u32)> {
    let line = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Version:"))?;
    let mut parts = line.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()
        .and_then(|part| part.split(|c: char| !c.is_ascii_digit()).next())
        .and_then(|part| part.parse().ok())
        .unwrap_or(0);
    Some((major, minor))
}

/// Last engine error line in a diagnostic.
fn summarize(diagnostic: &str) -> Option<&str> {
    diagnostic
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.contains("Error"))
}

fn read_pidfile(path: &Path) -> Result<ProcessId, EngineFailure> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EngineFailure::new(format!("failed to read pidfile {}: {}", path.display(), e), "")
    })?;
    content
        .trim()
        .parse::<ProcessId>()
        .map_err(|e| EngineFailure::new(format!("invalid pid in {}: {}", path.display(), e), ""))
}

fn common_args(options: &SnapshotOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-D".into(),
        options.images_handle.clone().into(),
        "-o".into(),
        options.log_file.into(),
        format!("-v{}", options.log_level).into(),
    ];

    let flags = &options.flags;
    for (enabled, flag) in [
        (flags.tcp_established, "--tcp-established"),
        (flags.ext_unix_sk, "--ext-unix-sk"),
        (flags.file_locks, "--file-locks"),
        (flags.shell_job, "--shell-job"),
        (flags.orphan_pts_master, "--orphan-pts-master"),
    ] {
        if enabled {
            args.push(flag.into());
        }
    }

    if let Some(mode) = options.cgroup_mode {
        args.push(format!("--manage-cgroups={}", mode.engine_value()).into());
    }
    for mount in &options.skip_mounts {
        args.push("--skip-mnt".into());
        args.push(mount.into());
    }
    if !options.enable_fs.is_empty() {
        args.push("--enable-fs".into());
        args.push(options.enable_fs.join(",").into());
    }
    if let Some(limit) = options.ghost_limit {
        args.push("--ghost-limit".into());
        args.push(limit.to_string().into());
    }

    args
}

fn dump_args(options: &SnapshotOptions) -> Result<Vec<OsString>, EngineFailure> {
    let pid = options
        .pid
        .ok_or_else(|| EngineFailure::new("dump requested without a target pid", ""))?;

    let mut args: Vec<OsString> = vec!["dump".into(), "-t".into(), pid.to_string().into()];
    args.extend(common_args(options));
    if options.leave_running {
        args.push("--leave-running".into());
    }
    Ok(args)
}

fn restore_args(options: &SnapshotOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["restore".into()];
    args.extend(common_args(options));
    if options.restore_detached {
        args.push("--restore-detached".into());
    }
    if let Some(pidfile) = options.pidfile {
        args.push("--pidfile".into());
        args.push(pidfile.into());
    }
    args
}
