// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Orchestration state machines with typed phase transitions.
//!
//! Checkpoint: Idle → Probing → OptionBuilding → Invoking → Recording → Done,
//! with Invoking → Probing when a strategy fails and the chain has more.
//! Restore: Idle → MetadataLoad → TargetReconciliation → Invoking → Verifying → Done.
//! Invalid transitions result in StateTransitionError.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::StateTransitionError;

/// A phase of an orchestration state machine.
pub trait Phase: Copy + PartialEq + fmt::Debug {
    /// Operation name for error messages and logs.
    const OPERATION: &'static str;

    /// Phase every machine starts in.
    const INITIAL: Self;

    /// Terminal phase for aborted operations.
    const FAILED: Self;

    /// Get the phase name for error messages.
    fn name(&self) -> &'static str;

    /// Check if transition to the target phase is valid.
    fn can_transition_to(&self, target: Self) -> bool;

    /// Terminal phases accept no further transitions.
    fn is_terminal(&self) -> bool;
}

/// Checkpoint orchestration phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPhase {
    Idle,
    Probing,
    OptionBuilding,
    Invoking,
    Recording,
    Done,
    Failed,
}

impl Phase for CheckpointPhase {
    const OPERATION: &'static str = "checkpoint";
    const INITIAL: Self = Self::Idle;
    const FAILED: Self = Self::Failed;

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Probing => "Probing",
            Self::OptionBuilding => "OptionBuilding",
            Self::Invoking => "Invoking",
            Self::Recording => "Recording",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::Probing) |
            (Self::Probing, Self::OptionBuilding) |
            (Self::OptionBuilding, Self::Invoking) |
            (Self::Invoking, Self::Recording) |
            // Next strategy in the chain starts from a fresh profile
            (Self::Invoking, Self::Probing) |
            (Self::Recording, Self::Done)
        ) || (!self.is_terminal() && target == Self::Failed)
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Restore orchestration phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Idle,
    MetadataLoad,
    TargetReconciliation,
    Invoking,
    Verifying,
    Done,
    Failed,
}

impl Phase for RestorePhase {
    const OPERATION: &'static str = "restore";
    const INITIAL: Self = Self::Idle;
    const FAILED: Self = Self::Failed;

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::MetadataLoad => "MetadataLoad",
            Self::TargetReconciliation => "TargetReconciliation",
            Self::Invoking => "Invoking",
            Self::Verifying => "Verifying",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::MetadataLoad)
                | (Self::MetadataLoad, Self::TargetReconciliation)
                | (Self::TargetReconciliation, Self::Invoking)
                | (Self::Invoking, Self::Verifying)
                | (Self::Verifying, Self::Done)
        ) || (!self.is_terminal() && target == Self::Failed)
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one orchestration call.
/// Enforces valid phase transitions and tracks timing.
#[derive(Debug)]
pub struct PhaseMachine<P: Phase> {
    target: String,
    current: P,
    started: Instant,
    last_transition: Instant,
    transition_count: u64,
}

impl<P: Phase> PhaseMachine<P> {
    /// Create a new machine in the initial phase.
    pub fn new(target: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            target: target.into(),
            current: P::INITIAL,
            started: now,
            last_transition: now,
            transition_count: 0,
        }
    }

    /// Get the current phase.
    pub fn phase(&self) -> P {
        self.current
    }

    /// Get the total time since the machine was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[cfg(test)]
    fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new phase.
    /// Returns Ok(()) if successful, or StateTransitionError if invalid.
    pub fn advance(&mut self, target: P) -> Result<(), StateTransitionError> {
        if self.current.is_terminal() {
            return Err(StateTransitionError::TerminalPhase {
                operation: P::OPERATION,
                phase: self.current.name(),
            });
        }

        if !self.current.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                operation: P::OPERATION,
                from: self.current.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            operation = P::OPERATION,
            target = %self.target,
            from = self.current.name(),
            to = target.name(),
            transition = self.transition_count + 1,
            in_phase_ms = self.last_transition.elapsed().as_millis() as u64,
            "Phase transition"
        );

        self.current = target;
        self.last_transition = Instant::now();
        self.transition_count += 1;

        Ok(())
    }

    /// Move to the failed phase unless already terminal. Used on error paths.
    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            tracing::debug!(
                operation = P::OPERATION,
                target = %self.target,
                from = self.current.name(),
                "Phase machine failed"
            );
            self.current = P::FAILED;
            self.last_transition = Instant::now();
            self.transition_count += 1;
        }
    }
}
