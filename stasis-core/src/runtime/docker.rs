// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Docker runtime driver.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use serde::Deserialize;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;

use super::{ContainerRuntime, ContainerState, RuntimeConnector};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    name: String,
    config: InspectConfig,
    state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
    #[serde(default)]
    pid: u32,
    #[serde(default)]
    status: String,
}

/// Decode `docker inspect` output for a single container.
fn parse_inspect(id: &str, stdout: &[u8]) -> Result<ContainerState, RuntimeError> {
    let mut entries: Vec<InspectEntry> =
        serde_json::from_slice(stdout).map_err(|e| RuntimeError::MalformedInspect {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

    let entry = entries.pop().ok_or_else(|| RuntimeError::MalformedInspect {
        id: id.to_string(),
        reason: "empty inspect result".to_string(),
    })?;

    Ok(ContainerState {
        id: entry.id,
        name: entry.name.trim_start_matches('/').to_string(),
        image: entry.config.image,
        running: entry.state.running,
        pid: entry.state.pid,
        status: entry.state.status,
    })
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("No such object") || stderr.contains("No such container")
}

/// Connects to the Docker daemon through the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerConnector {
    binary: PathBuf,
}

impl DockerConnector {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.binary.clone(),
        }
    }
}

impl RuntimeConnector for DockerConnector {
    fn connect(&self) -> Result<Box<dyn ContainerRuntime>, RuntimeError> {
        let output = Command::new(&self.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .map_err(|e| RuntimeError::Unavailable {
                reason: format!("failed to execute {}: {}", self.binary.display(), e),
            })?;

        if !output.status.success() {
            return Err(RuntimeError::Unavailable {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::debug!(
            server_version = %String::from_utf8_lossy(&output.stdout).trim(),
            "Connected to container runtime"
        );

        Ok(Box::new(DockerCli {
            binary: self.binary.clone(),
        }))
    }
}

/// One Docker connection.
#[derive(Debug)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    fn exec<I, S>(&self, operation: &'static str, id: &str, args: I) -> Result<Output, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| RuntimeError::CommandFailed {
                operation,
                id: id.to_string(),
                stderr: format!("failed to execute {}: {}", self.binary.display(), e),
            })
    }

    fn checked<I, S>(
        &self,
        operation: &'static str,
        id: &str,
        args: I,
    ) -> Result<Output, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.exec(operation, id, args)?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                operation,
                id: id.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl ContainerRuntime for DockerCli {
    fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError> {
        let output = self.exec("inspect", id, ["inspect", "--type", "container", id])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(RuntimeError::CommandFailed {
                operation: "inspect",
                id: id.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        parse_inspect(id, &output.stdout).map(Some)
    }

    fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        tracing::info!(container = id, grace_secs = grace.as_secs(), "Stopping container");
        let secs = grace.as_secs().to_string();
        self.checked("stop", id, ["stop", "-t", secs.as_str(), id])?;
        Ok(())
    }

    fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        tracing::info!(container = id, force, "Removing container");
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(id);
        self.checked("remove", id, args)?;
        Ok(())
    }

    fn create(&self, image: &str, name: &str, command: &[String]) -> Result<String, RuntimeError> {
        tracing::info!(image, name, command = ?command, "Creating container");
        let mut args: Vec<&str> = vec!["create", "--name", name, image];
        args.extend(command.iter().map(String::as_str));

        let output = self.checked("create", name, args)?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::CommandFailed {
                operation: "create",
                id: name.to_string(),
                stderr: "runtime returned no container id".to_string(),
            });
        }
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<(), RuntimeError> {
        tracing::info!(container = id, "Starting container");
        self.checked("start", id, ["start", id])?;
        Ok(())
    }

    fn checkpoint(
        &self,
        id: &str,
        name: &str,
        dir: &Path,
        leave_running: bool,
    ) -> Result<(), RuntimeError> {
        tracing::info!(
            container = id,
            checkpoint = name,
            dir = %dir.display(),
            leave_running,
            "Creating runtime checkpoint"
        );
        let mut args: Vec<&OsStr> = vec![
            OsStr::new("checkpoint"),
            OsStr::new("create"),
            OsStr::new("--checkpoint-dir"),
            dir.as_os_str(),
        ];
        if leave_running {
            args.push(OsStr::new("--leave-running"));
        }
        args.push(OsStr::new(id));
        args.push(OsStr::new(name));
        self.checked("checkpoint", id, args)?;
        Ok(())
    }

    fn start_from_checkpoint(&self, id: &str, name: &str, dir: &Path) -> Result<(), RuntimeError> {
        tracing::info!(
            container = id,
            checkpoint = name,
            dir = %dir.display(),
            "Starting container from checkpoint"
        );
        let args: [&OsStr; 6] = [
            OsStr::new("start"),
            OsStr::new("--checkpoint"),
            OsStr::new(name),
            OsStr::new("--checkpoint-dir"),
            dir.as_os_str(),
            OsStr::new(id),
        ];
        self.checked("start-from-checkpoint", id, args)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT: &str = r#"[
        {
            "Id": "3f4e8a1c9b2d",
            "Name": "/web",
            "Config": { "Image": "nginx:1.25", "Env": [] },
            "State": { "Status": "running", "Running": true, "Pid": 4312, "ExitCode": 0 }
        }
    ]"#;

    #[test]
    fn test_parse_inspect() {
        let state = parse_inspect("web", INSPECT.as_bytes()).unwrap();
        assert_eq!(state.id, "3f4e8a1c9b2d");
        assert_eq!(state.name, "web");
        assert_eq!(state.image, "nginx:1.25");
        assert!(state.is_live());
        assert_eq!(state.status, "running");
    }

    #[test]
    fn test_parse_inspect_stopped() {
        let json = r#"[{"Id":"abc","Name":"/db","Config":{"Image":"redis"},"State":{"Status":"exited","Running":false,"Pid":0}}]"#;
        let state = parse_inspect("db", json.as_bytes()).unwrap();
        assert!(!state.running);
        assert!(!state.is_live());
    }

    #[test]
    fn test_parse_inspect_rejects_garbage() {
        assert!(matches!(
            parse_inspect("x", b"not json"),
            Err(RuntimeError::MalformedInspect { .. })
        ));
        assert!(matches!(
            parse_inspect("x", b"[]"),
            Err(RuntimeError::MalformedInspect { .. })
        ));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("Error: No such object: web"));
        assert!(is_not_found("Error response from daemon: No such container: web"));
        assert!(!is_not_found("permission denied while trying to connect"));
    }

    #[test]
    fn test_connect_fails_without_binary() {
        let connector = DockerConnector {
            binary: PathBuf::from("/nonexistent/docker"),
        };
        assert!(matches!(
            connector.connect(),
            Err(RuntimeError::Unavailable { .. })
        ));
    }
}
