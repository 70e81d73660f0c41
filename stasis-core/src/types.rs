// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a container reference (full ids are 64 hex chars).
const MAX_CONTAINER_REF_LEN: usize = 128;

/// Validated process identifier.
/// Must be non-zero; pid 0 is the scheduler and never a checkpoint target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ProcessId(u32);

impl ProcessId {
    /// Create a new ProcessId with validation.
    pub fn new(pid: u32) -> Result<Self, HardValidationError> {
        if pid == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "pid",
                value: "0".to_string(),
                reason: "Process ID must be non-zero".to_string(),
            });
        }
        Ok(Self(pid))
    }

    /// Get the inner pid value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for ProcessId {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProcessId> for u32 {
    fn from(pid: ProcessId) -> Self {
        pid.0
    }
}

impl FromStr for ProcessId {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u32>()
            .map_err(|e| HardValidationError::InvalidFieldValue {
                field: "pid",
                value: s.to_string(),
                reason: e.to_string(),
            })?;
        Self::new(value)
    }
}

/// Validated container reference (id or name).
/// Must be non-empty, alphanumeric with `-`, `_`, `.`, max 128 chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerRef(String);

impl ContainerRef {
    /// Create a new ContainerRef with validation.
    ///
    /// A single leading `/` (as reported by `docker inspect` for names) is stripped.
    pub fn new(reference: impl Into<String>) -> Result<Self, HardValidationError> {
        let reference = reference.into();
        let trimmed = reference.strip_prefix('/').unwrap_or(&reference);

        if trimmed.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "container",
                value: reference.clone(),
                reason: "Container reference cannot be empty".to_string(),
            });
        }

        if trimmed.len() > MAX_CONTAINER_REF_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "container",
                value: reference.clone(),
                reason: format!(
                    "Container reference too long: {} chars (max {})",
                    trimmed.len(),
                    MAX_CONTAINER_REF_LEN
                ),
            });
        }

        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "container",
                value: reference.clone(),
                reason: "Container reference must contain only alphanumeric characters, hyphens, underscores, and dots".to_string(),
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContainerRef {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContainerRef> for String {
    fn from(reference: ContainerRef) -> Self {
        reference.0
    }
}

/// What the caller asked to checkpoint, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Process(ProcessId),
    Container(ContainerRef),
}

impl FromStr for TargetSpec {
    type Err = HardValidationError;

    /// A positive integer is a pid; anything else names a container.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<u32>() {
            Ok(pid) => Ok(Self::Process(ProcessId::new(pid)?)),
            Err(_) => Ok(Self::Container(ContainerRef::new(s)?)),
        }
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(pid) => write!(f, "pid {}", pid),
            Self::Container(reference) => write!(f, "container {}", reference),
        }
    }
}

/// A resolved checkpoint target.
///
/// Container targets always carry the image and declared name so a restore
/// can recreate an equivalent container shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    Process {
        pid: ProcessId,
    },
    Container {
        id: ContainerRef,
        name: ContainerRef,
        image: String,
        pid: ProcessId,
    },
}

impl CaptureTarget {
    /// Process whose state is captured.
    pub fn pid(&self) -> ProcessId {
        match self {
            Self::Process { pid } => *pid,
            Self::Container { pid, .. } => *pid,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container { .. })
    }

    /// Stable key used for in-flight exclusivity.
    ///
    /// Containers are keyed by name, which survives recreation on restore.
    pub fn lock_key(&self) -> String {
        match self {
            Self::Process { pid } => process_lock_key(*pid),
            Self::Container { name, .. } => container_lock_key(name),
        }
    }
}

pub(crate) fn process_lock_key(pid: ProcessId) -> String {
    format!("pid-{}", pid)
}

pub(crate) fn container_lock_key(name: &ContainerRef) -> String {
    format!("container-{}", name)
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process { pid } => write!(f, "pid {}", pid),
            Self::Container { name, pid, .. } => write!(f, "container {} (pid {})", name, pid),
        }
    }
}

/// Named policy for which engine options a checkpoint or restore uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Identifier, destination and log routing only; least likely to conflict
    /// with namespace setups, lowest fidelity.
    DirectMinimal,

    /// Full resource-class handling with container-runtime mount and cgroup
    /// exclusions.
    DirectContainerAware,

    /// Hand the whole operation to the container runtime's own primitive.
    ContainerNativeDelegate,
}

impl Strategy {
    /// Get the strategy name as written in records and config.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DirectMinimal => "direct-minimal",
            Self::DirectContainerAware => "direct-container-aware",
            Self::ContainerNativeDelegate => "container-native-delegate",
        }
    }

    /// Whether the engine is invoked directly (as opposed to delegated).
    pub const fn is_direct(&self) -> bool {
        !matches!(self, Self::ContainerNativeDelegate)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Strategy {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct-minimal" => Ok(Self::DirectMinimal),
            "direct-container-aware" => Ok(Self::DirectContainerAware),
            "container-native-delegate" => Ok(Self::ContainerNativeDelegate),
            other => Err(HardValidationError::InvalidFieldValue {
                field: "strategy",
                value: other.to_string(),
                reason: "Expected direct-minimal, direct-container-aware or container-native-delegate".to_string(),
            }),
        }
    }
}
