// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process characterization.
//!
//! Reads a live process's procfs entries to build a [`CapabilityProfile`]:
//! which resource classes it holds and what scheduling state it is in.
//! Purely observational; nothing here writes to the target.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::error::PreconditionError;
use crate::types::ProcessId;

/// TCP connection state code for ESTABLISHED in `/proc/net/tcp`.
const TCP_ESTABLISHED: u32 = 0x01;

/// Kernel scheduling state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Running,
    Sleeping,
    DiskWait,
    Zombie,
    Stopped,
    Dead,
}

impl LifecycleState {
    /// Decode the state letter from `/proc/<pid>/stat`.
    pub fn from_stat_code(code: char) -> Option<Self> {
        match code {
            'R' => Some(Self::Running),
            'S' | 'I' | 'P' | 'W' => Some(Self::Sleeping),
            'D' => Some(Self::DiskWait),
            'Z' => Some(Self::Zombie),
            'T' | 't' => Some(Self::Stopped),
            'X' | 'x' | 'K' => Some(Self::Dead),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::DiskWait => "disk-wait",
            Self::Zombie => "zombie",
            Self::Stopped => "stopped",
            Self::Dead => "dead",
        }
    }

    /// Whether a checkpoint may be attempted in this state.
    pub const fn is_checkpointable(&self) -> bool {
        !matches!(self, Self::Zombie | Self::Dead)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Snapshot of a process's externally-visible resource usage at probe time.
///
/// Never cached: process state can change between checkpoint attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityProfile {
    pub pid: ProcessId,
    /// First element of the command line; empty for kernel threads.
    pub name: String,
    pub state: LifecycleState,
    pub has_established_tcp: bool,
    pub has_unix_sockets: bool,
    pub has_pipes: bool,
    pub has_eventfd: bool,
    pub has_signalfd: bool,
    pub has_timerfd: bool,
    /// Process group id equals session id.
    pub is_shell_job: bool,
}

/// Why a probe could not produce a profile.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Process {0} does not exist")]
    NotFound(ProcessId),

    #[error("Cannot decode stat of process {pid}: {reason}")]
    MalformedStat { pid: ProcessId, reason: String },
}

impl From<ProbeError> for PreconditionError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::NotFound(pid) => PreconditionError::TargetNotFound { pid },
            ProbeError::MalformedStat { pid, reason } => PreconditionError::TargetNotRunning {
                target: format!("pid {}", pid),
                state: format!("unreadable stat: {}", reason),
            },
        }
    }
}

/// Fields of `/proc/<pid>/stat` the probe needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatFields {
    state: LifecycleState,
    pgrp: i64,
    session: i64,
}

/// Inspects live processes through procfs.
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    proc_root: PathBuf,
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessProbe {
    /// Create a probe reading from the given procfs mount.
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn process_dir(&self, pid: ProcessId) -> PathBuf {
        self.proc_root.join(pid.to_string())
    }

    /// Build a capability profile for `pid`.
    ///
    /// Zombie processes still produce a profile; callers decide whether the
    /// state is acceptable.
    pub fn probe(&self, pid: ProcessId) -> Result<CapabilityProfile, ProbeError> {
        let dir = self.process_dir(pid);

        let stat = match fs::read_to_string(dir.join("stat")) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProbeError::NotFound(pid));
            }
            Err(e) => {
                return Err(ProbeError::MalformedStat {
                    pid,
                    reason: e.to_string(),
                });
            }
        };

        let fields = parse_stat(&stat).map_err(|reason| ProbeError::MalformedStat { pid, reason })?;

        let mut profile = CapabilityProfile {
            pid,
            name: read_process_name(&dir),
            state: fields.state,
            has_established_tcp: false,
            has_unix_sockets: false,
            has_pipes: false,
            has_eventfd: false,
            has_signalfd: false,
            has_timerfd: false,
            is_shell_job: fields.pgrp == fields.session,
        };

        scan_file_descriptors(&dir.join("fd"), &mut profile);

        let net = dir.join("net");
        profile.has_established_tcp = has_established_tcp(&net.join("tcp"))
            || has_established_tcp(&net.join("tcp6"));
        if !profile.has_unix_sockets {
            profile.has_unix_sockets = has_unix_sockets(&net.join("unix"));
        }

        tracing::debug!(
            pid = %pid,
            name = %profile.name,
            state = %profile.state,
            tcp = profile.has_established_tcp,
            unix = profile.has_unix_sockets,
            pipes = profile.has_pipes,
            shell_job = profile.is_shell_job,
            "Process probed"
        );

        Ok(profile)
    }
}

/// Parse state, pgrp and session out of a stat line.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
fn parse_stat(stat: &str) -> Result<StatFields, String> {
    let end = stat
        .rfind(')')
        .ok_or_else(|| "missing command name terminator".to_string())?;
    let mut fields = stat[end + 1..].split_whitespace();

    let code = fields
        .next()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| "missing state field".to_string())?;
    let state =
        LifecycleState::from_stat_code(code).ok_or_else(|| format!("unknown state '{}'", code))?;

    // state ppid pgrp session
    let _ppid = fields.next();
    let pgrp = parse_stat_number(fields.next(), "pgrp")?;
    let session = parse_stat_number(fields.next(), "session")?;

    Ok(StatFields {
        state,
        pgrp,
        session,
    })
}

fn parse_stat_number(field: Option<&str>, name: &str) -> Result<i64, String> {
    field
        .ok_or_else(|| format!("missing {} field", name))?
        .parse::<i64>()
        .map_err(|e| format!("invalid {} field: {}", name, e))
}

fn read_process_name(dir: &Path) -> String {
    fs::read(dir.join("cmdline"))
        .ok()
        .and_then(|raw| {
            raw.split(|b| *b == 0)
                .next()
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
        })
        .unwrap_or_default()
}

fn scan_file_descriptors(fd_dir: &Path, profile: &mut CapabilityProfile) {
    let entries = match fs::read_dir(fd_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(path = %fd_dir.display(), error = %e, "Cannot list file descriptors");
            return;
        }
    };

    for entry in entries.flatten() {
        let Ok(target) = fs::read_link(entry.path()) else {
            continue;
        };
        let target = target.to_string_lossy();

        if target.starts_with("pipe:") {
            profile.has_pipes = true;
        } else if target.starts_with("socket:") {
            profile.has_unix_sockets = true;
        } else if target.starts_with("anon_inode:[eventfd]") {
            profile.has_eventfd = true;
        } else if target.starts_with("anon_inode:[signalfd]") {
            profile.has_signalfd = true;
        } else if target.starts_with("anon_inode:[timerfd]") {
            profile.has_timerfd = true;
        }
    }
}

/// Scan a TCP socket table for any ESTABLISHED entry. Stops at the first match.
fn has_established_tcp(table: &Path) -> bool {
    let Ok(content) = fs::read_to_string(table) else {
        return false;
    };

    content
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(3))
        .any(|state| u32::from_str_radix(state, 16).ok() == Some(TCP_ESTABLISHED))
}

/// Any listed unix-domain socket beyond the header line.
fn has_unix_sockets(table: &Path) -> bool {
    fs::read_to_string(table)
        .map(|content| content.lines().skip(1).any(|line| !line.trim().is_empty()))
        .unwrap_or(false)
}
