// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-target in-flight exclusivity.
//!
//! An in-process `DashMap` set guards threads of one orchestrator; a
//! `flock` on `<lock_dir>/<key>.lock` guards separate processes.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{StasisError, StasisResult};

/// Registry of targets with an operation in flight.
#[derive(Debug, Clone)]
pub struct TargetLocks {
    held: Arc<DashMap<String, Instant>>,
    lock_dir: PathBuf,
}

impl TargetLocks {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            held: Arc::new(DashMap::new()),
            lock_dir: lock_dir.into(),
        }
    }

    /// Claim `key` for the lifetime of the returned guard.
    pub fn acquire(&self, key: &str) -> StasisResult<TargetGuard> {
        match self.held.entry(key.to_string()) {
            Entry::Occupied(_) => {
                return Err(StasisError::TargetBusy {
                    target: key.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
            }
        }

        // From here on the guard owns the in-process claim.
        let mut guard = TargetGuard {
            key: key.to_string(),
            held: Arc::clone(&self.held),
            file_lock: None,
        };
        guard.file_lock = Some(Self::lock_file(
            self.lock_dir.join(format!("{}.lock", key)),
            key,
        )?);

        tracing::debug!(target_key = key, "Acquired target lock");
        Ok(guard)
    }

    fn lock_file(path: PathBuf, key: &str) -> StasisResult<Flock<File>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StasisError::Io {
                context: "creating lock directory",
                source: e,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StasisError::Io {
                context: "opening target lock file",
                source: e,
            })?;

        Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| match errno {
            Errno::EAGAIN => StasisError::TargetBusy {
                target: key.to_string(),
            },
            other => StasisError::Io {
                context: "locking target lock file",
                source: other.into(),
            },
        })
    }

    #[cfg(test)]
    fn is_held(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }
}

/// Releases its target on drop.
pub struct TargetGuard {
    key: String,
    held: Arc<DashMap<String, Instant>>,
    file_lock: Option<Flock<File>>,
}

impl std::fmt::Debug for TargetGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetGuard")
            .field("key", &self.key)
            .field("file_lock", &self.file_lock.is_some())
            .finish()
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        // Release the file lock before the in-process claim.
        self.file_lock.take();
        if let Some((_, since)) = self.held.remove(&self.key) {
            tracing::debug!(
                target_key = %self.key,
                held_ms = since.elapsed().as_millis() as u64,
                "Released target lock"
            );
        }
    }
}
