// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for Stasis.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ProcessId, Strategy};

/// Top-level error type for the Stasis orchestrator.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum StasisError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Orchestration Errors
    // =========================================================================
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("Invalid phase transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    #[error("Checkpoint engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    #[error("Another checkpoint/restore is already in flight for {target}")]
    TargetBusy { target: String },

    #[error("Checkpoint of {target} failed with every strategy:{}", OutcomeList(.outcomes))]
    CheckpointExhausted {
        target: String,
        outcomes: Vec<StrategyOutcome>,
    },

    // =========================================================================
    // Restore Errors - Never Treated As Success
    // =========================================================================
    #[error("No checkpoint metadata found in {dir}")]
    MissingMetadata { dir: PathBuf },

    #[error("Checkpoint metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Restore with strategy {strategy} failed: {failure}")]
    RestoreFailed {
        strategy: Strategy,
        failure: EngineFailure,
    },

    #[error("Restore of {target} not confirmed live after {attempts} checks: {last_state}")]
    RestoreUnverified {
        target: String,
        attempts: u32,
        last_state: String,
    },

    // =========================================================================
    // External Collaborators
    // =========================================================================
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl StasisError {
    /// Most recent raw engine output attached to this error, if any.
    ///
    /// For an exhausted fallback chain this is the diagnostic of the last
    /// strategy attempted.
    pub fn engine_diagnostic(&self) -> Option<&str> {
        match self {
            Self::CheckpointExhausted { outcomes, .. } => outcomes
                .iter()
                .rev()
                .find_map(|outcome| outcome.failure())
                .map(|failure| failure.diagnostic.as_str())
                .filter(|text| !text.is_empty()),
            Self::RestoreFailed { failure, .. } if !failure.diagnostic.is_empty() => {
                Some(failure.diagnostic.as_str())
            }
            _ => None,
        }
    }
}

/// Hard validation errors cause immediate process termination.
/// Used when configuration or user input is invalid and the system cannot safely start.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Duplicate strategy in {chain} chain: {strategy}")]
    DuplicateStrategy {
        chain: &'static str,
        strategy: Strategy,
    },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Conditions that make a target ineligible for checkpointing.
/// Always fatal - no strategy can work around them.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("Process {pid} does not exist")]
    TargetNotFound { pid: ProcessId },

    #[error("Target {target} is not running (state: {state})")]
    TargetNotRunning { target: String, state: String },

    #[error("Process {pid} is a zombie and cannot be checkpointed")]
    ZombieProcess { pid: ProcessId },

    #[error("Process {pid} is dead and cannot be checkpointed")]
    DeadProcess { pid: ProcessId },

    #[error("Container {id} not found")]
    ContainerNotFound { id: String },
}

/// Phase transition errors for the orchestration state machines.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} during {operation}")]
    InvalidTransition {
        operation: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("{operation} is in terminal phase: {phase}")]
    TerminalPhase {
        operation: &'static str,
        phase: &'static str,
    },
}

/// Errors reading or writing checkpoint records.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Unsupported record format version {found} (supported: {supported})")]
    UnsupportedVersion { found: String, supported: u32 },

    #[error("Record is missing field {field}")]
    MissingField { field: &'static str },

    #[error("Record field {field} has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("Malformed record line {line}: '{content}'")]
    MalformedLine { line: usize, content: String },

    #[error("Record checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Record already exists at {path}")]
    AlreadyExists { path: PathBuf },
}

/// Errors talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container runtime unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Runtime {operation} on {id} failed: {stderr}")]
    CommandFailed {
        operation: &'static str,
        id: String,
        stderr: String,
    },

    #[error("Could not decode runtime inspect output for {id}: {reason}")]
    MalformedInspect { id: String, reason: String },
}

/// A failed engine (or delegated runtime) invocation.
///
/// Carries the engine's raw diagnostic output - log file contents or stderr -
/// so operators can see which resource class the attempt tripped on.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct EngineFailure {
    pub reason: String,
    pub diagnostic: String,
}

impl EngineFailure {
    pub fn new(reason: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// A failure raised by a lifecycle callback rather than the engine.
    pub fn callback(phase: &str, reason: impl fmt::Display) -> Self {
        Self {
            reason: format!("{} callback failed: {}", phase, reason),
            diagnostic: String::new(),
        }
    }
}

/// Delegated operations report runtime failures as strategy failures.
impl From<RuntimeError> for EngineFailure {
    fn from(err: RuntimeError) -> Self {
        let diagnostic = match &err {
            RuntimeError::CommandFailed { stderr, .. } => stderr.clone(),
            _ => String::new(),
        };
        Self {
            reason: err.to_string(),
            diagnostic,
        }
    }
}

/// Result of one strategy attempt inside a fallback chain.
#[derive(Debug, Clone)]
pub enum StrategyOutcome {
    Succeeded(Strategy),
    Failed {
        strategy: Strategy,
        failure: EngineFailure,
    },
}

impl StrategyOutcome {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Succeeded(strategy) => *strategy,
            Self::Failed { strategy, .. } => *strategy,
        }
    }

    pub fn failure(&self) -> Option<&EngineFailure> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed { failure, .. } => Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

impl fmt::Display for StrategyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(strategy) => write!(f, "{}: ok", strategy),
            Self::Failed { strategy, failure } => write!(f, "{}: {}", strategy, failure),
        }
    }
}

struct OutcomeList<'a>(&'a [StrategyOutcome]);

impl fmt::Display for OutcomeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in self.0 {
            write!(f, "\n  - {}", outcome)?;
        }
        Ok(())
    }
}

/// Result type alias using StasisError.
pub type StasisResult<T> = Result<T, StasisError>;
