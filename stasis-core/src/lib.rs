// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Stasis Core Library
//!
//! Checkpoint/restore orchestration for processes and containers.
//! Provides process probing, engine option building, the CRIU and Docker
//! drivers, versioned checkpoint records, and the two orchestrators.

pub mod callbacks;
pub mod config;
pub mod criu;
pub mod error;
pub mod metadata;
pub mod options;
pub mod orchestrator;
pub mod probe;
pub mod runtime;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use callbacks::{HookCallbacks, LifecycleCallbacks, NoopCallbacks};
pub use config::{Config, ConfigLoader};
pub use criu::{CheckpointEngine, CriuCli};
pub use error::{
    EngineFailure, HardValidationError, PreconditionError, StasisError, StasisResult,
    StrategyOutcome,
};
pub use metadata::{CheckpointRecord, MetadataStore};
pub use orchestrator::{
    CheckpointOrchestrator, CheckpointRequest, RestoreOrchestrator, RestoreRequest, TargetLocks,
};
pub use probe::{CapabilityProfile, ProcessProbe};
pub use runtime::{ContainerRuntime, DockerConnector, RuntimeConnector};
pub use state::{CheckpointPhase, RestorePhase};
pub use types::{CaptureTarget, ContainerRef, ProcessId, Strategy, TargetSpec};
