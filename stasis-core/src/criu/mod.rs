// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint engine contract and the CRIU driver.
//!
//! The orchestrator never parses image files; it hands the engine options
//! and an open images directory and reads back success or a diagnostic.

mod driver;
mod images;

use std::fmt;

pub use driver::CriuCli;
pub use images::ImagesDir;

use crate::callbacks::LifecycleCallbacks;
use crate::error::EngineFailure;
use crate::options::SnapshotOptions;
use crate::types::ProcessId;

/// Engine version as reported by its version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub raw: String,
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// External checkpoint/restore engine.
///
/// Every call is blocking and exclusive; callers hold the images directory
/// handle referenced by the options for the duration of the call.
pub trait CheckpointEngine {
    /// Fails fast if the engine is not usable on this host.
    fn version(&self) -> Result<EngineVersion, EngineFailure>;

    /// Capture the process tree described by `options`.
    fn dump(
        &self,
        options: &SnapshotOptions,
        callbacks: &mut dyn LifecycleCallbacks,
    ) -> Result<(), EngineFailure>;

    /// Replay a captured tree. Returns the restored root pid.
    fn restore(
        &self,
        options: &SnapshotOptions,
        callbacks: &mut dyn LifecycleCallbacks,
    ) -> Result<ProcessId, EngineFailure>;
}
