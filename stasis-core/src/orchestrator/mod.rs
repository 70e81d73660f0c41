// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint and restore orchestration.

mod checkpoint;
mod locks;
mod restore;

pub use checkpoint::{CheckpointOrchestrator, CheckpointReport, CheckpointRequest};
pub use locks::{TargetGuard, TargetLocks};
pub use restore::{RestoreOrchestrator, RestoreReport, RestoreRequest};
