// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Engine lifecycle callbacks.
//!
//! The engine driver calls these at phase boundaries during dump and restore.
//! Every method defaults to a no-op; implementations override only the phases
//! they care about. A callback error aborts the current attempt.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::config::HookConfig;

/// A lifecycle callback refused to let the operation continue.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Failed to spawn {phase} hook {script}: {reason}")]
    SpawnFailed {
        phase: &'static str,
        script: PathBuf,
        reason: String,
    },

    #[error("{phase} hook {script} exited with {status}")]
    HookFailed {
        phase: &'static str,
        script: PathBuf,
        status: String,
    },
}

/// Phase-boundary events raised by the engine.
pub trait LifecycleCallbacks {
    /// Before state capture begins.
    fn pre_dump(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// After state capture completes.
    fn post_dump(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Before state replay begins.
    fn pre_restore(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// After the restored tree exists, with its root pid.
    fn post_restore(&mut self, pid: u32) -> Result<(), CallbackError> {
        let _ = pid;
        Ok(())
    }

    /// Engine is about to lock external network state.
    fn network_lock(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Engine released external network state.
    fn network_unlock(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Per-namespace setup for the restored root pid begins.
    fn setup_namespaces(&mut self, pid: u32) -> Result<(), CallbackError> {
        let _ = pid;
        Ok(())
    }

    /// Per-namespace setup completed.
    fn post_setup_namespaces(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Restored process resumed execution.
    fn post_resume(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Callbacks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl LifecycleCallbacks for NoopCallbacks {}

/// Runs the configured hook script for each phase that has one.
///
/// Scripts run as `/bin/sh <script>` with `STASIS_PHASE` set, plus
/// `STASIS_PID` once a pid is known. A non-zero exit fails the phase.
#[derive(Debug, Clone)]
pub struct HookCallbacks {
    hooks: HookConfig,
    shell: PathBuf,
    pid: Option<u32>,
}

impl HookCallbacks {
    pub fn new(hooks: HookConfig) -> Self {
        Self {
            hooks,
            shell: PathBuf::from("/bin/sh"),
            pid: None,
        }
    }

    /// Pid exported to hooks that run before the engine reports one.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    fn run(&self, phase: &'static str, script: Option<&Path>) -> Result<(), CallbackError> {
        let Some(script) = script else {
            tracing::trace!(phase, "No hook configured");
            return Ok(());
        };

        tracing::info!(phase, script = %script.display(), "Running lifecycle hook");

        let mut command = Command::new(&self.shell);
        command.arg(script).env("STASIS_PHASE", phase);
        if let Some(pid) = self.pid {
            command.env("STASIS_PID", pid.to_string());
        }

        let status = command.status().map_err(|e| CallbackError::SpawnFailed {
            phase,
            script: script.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !status.success() {
            return Err(CallbackError::HookFailed {
                phase,
                script: script.to_path_buf(),
                status: status.to_string(),
            });
        }

        Ok(())
    }
}

impl LifecycleCallbacks for HookCallbacks {
    fn pre_dump(&mut self) -> Result<(), CallbackError> {
        self.run("pre-dump", self.hooks.pre_dump.as_deref())
    }

    fn post_dump(&mut self) -> Result<(), CallbackError> {
        self.run("post-dump", self.hooks.post_dump.as_deref())
    }

    fn pre_restore(&mut self) -> Result<(), CallbackError> {
        self.run("pre-restore", self.hooks.pre_restore.as_deref())
    }

    fn post_restore(&mut self, pid: u32) -> Result<(), CallbackError> {
        self.pid = Some(pid);
        self.run("post-restore", self.hooks.post_restore.as_deref())
    }

    fn post_resume(&mut self) -> Result<(), CallbackError> {
        self.run("post-resume", self.hooks.post_resume.as_deref())
    }
}
