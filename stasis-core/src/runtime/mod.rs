// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Container runtime contract.
//!
//! Orchestrators open a fresh connection per logical operation through a
//! [`RuntimeConnector`] and drop it when the operation ends.

mod docker;

use std::path::Path;
use std::time::Duration;

pub use docker::{DockerCli, DockerConnector};

use crate::error::RuntimeError;

/// Live state of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    /// Declared name without the leading `/`.
    pub name: String,
    pub image: String,
    pub running: bool,
    /// Root process id; zero when not running.
    pub pid: u32,
    pub status: String,
}

impl ContainerState {
    /// Running with a real root process.
    pub fn is_live(&self) -> bool {
        self.running && self.pid != 0
    }
}

/// Operations the orchestrators need from a container runtime.
pub trait ContainerRuntime {
    /// `None` when the runtime does not know the container.
    fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError>;

    /// Stop, forcing after `grace`.
    fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Create a stopped container; returns its id.
    fn create(&self, image: &str, name: &str, command: &[String]) -> Result<String, RuntimeError>;

    fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Runtime-native checkpoint into `dir` under `name`.
    fn checkpoint(
        &self,
        id: &str,
        name: &str,
        dir: &Path,
        leave_running: bool,
    ) -> Result<(), RuntimeError>;

    /// Runtime-native restore of checkpoint `name` from `dir`.
    fn start_from_checkpoint(&self, id: &str, name: &str, dir: &Path)
        -> Result<(), RuntimeError>;
}

/// Opens runtime connections.
pub trait RuntimeConnector {
    fn connect(&self) -> Result<Box<dyn ContainerRuntime>, RuntimeError>;
}
