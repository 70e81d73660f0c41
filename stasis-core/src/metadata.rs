// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint metadata store.
//!
//! Each checkpoint lives in its own generation directory under the
//! destination, with an immutable `container.info` record next to the engine
//! images. `LATEST` names the newest committed generation.
//!
//! # Record format
//!
//! Line-oriented `KEY=VALUE`, terminated by a `CHECKSUM` line holding the
//! CRC32 of every preceding byte. Records are written once with create-new
//! semantics and never rewritten.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::error::{MetadataError, StasisError, StasisResult};
use crate::options::ResourceFlags;
use crate::types::{ContainerRef, ProcessId, Strategy};

/// Record file name inside a generation directory.
pub const RECORD_FILE: &str = "container.info";
/// Pointer to the newest generation.
pub const LATEST_FILE: &str = "LATEST";
/// Record format this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

const CHECKSUM_KEY: &str = "CHECKSUM";

/// Identity of a checkpointed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub id: ContainerRef,
    pub name: ContainerRef,
    pub image: String,
}

/// Durable description of one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub record_id: String,
    /// Absent for bare-process checkpoints.
    pub container: Option<ContainerIdentity>,
    pub pid: ProcessId,
    pub strategy: Strategy,
    /// Unix seconds.
    pub created_at: u64,
    pub images_dir: PathBuf,
    /// Resource handling the successful dump used.
    pub flags: ResourceFlags,
    /// Runtime checkpoint name for delegated checkpoints.
    pub checkpoint_name: Option<String>,
}

impl CheckpointRecord {
    /// Serialize to the versioned text format.
    pub fn encode(&self) -> Result<String, MetadataError> {
        let mut fields: Vec<(&'static str, String)> = vec![
            ("FORMAT_VERSION", FORMAT_VERSION.to_string()),
            ("RECORD_ID", self.record_id.clone()),
        ];
        if let Some(container) = &self.container {
            fields.push(("CONTAINER_ID", container.id.to_string()));
            fields.push(("CONTAINER_NAME", container.name.to_string()));
        }
        // Present but empty for bare processes, so every record has the key.
        let image = self.container.as_ref().map(|c| c.image.clone());
        fields.push(("IMAGE", image.unwrap_or_default()));
        fields.push(("PID", self.pid.to_string()));
        fields.push(("STRATEGY", self.strategy.name().to_string()));
        fields.push(("CREATED_AT", self.created_at.to_string()));
        fields.push(("IMAGES_DIR", self.images_dir.display().to_string()));
        fields.push(("TCP_ESTABLISHED", self.flags.tcp_established.to_string()));
        fields.push(("EXT_UNIX_SK", self.flags.ext_unix_sk.to_string()));
        fields.push(("FILE_LOCKS", self.flags.file_locks.to_string()));
        fields.push(("SHELL_JOB", self.flags.shell_job.to_string()));
        fields.push(("ORPHAN_PTS_MASTER", self.flags.orphan_pts_master.to_string()));
        if let Some(name) = &self.checkpoint_name {
            fields.push(("CHECKPOINT_NAME", name.clone()));
        }

        let mut body = String::new();
        for (key, value) in fields {
            if value.contains('\n') || value.contains('\r') {
                return Err(MetadataError::InvalidField { field: key, value });
            }
            body.push_str(key);
            body.push('=');
            body.push_str(&value);
            body.push('\n');
        }

        let checksum = crc32fast::hash(body.as_bytes());
        body.push_str(&format!("{}={:08x}\n", CHECKSUM_KEY, checksum));
        Ok(body)
    }

    /// Parse and verify a record.
    ///
    /// Records without a `STRATEGY` (written by older tooling) are rejected
    /// rather than guessed at.
    pub fn decode(content: &str) -> Result<Self, MetadataError> {
        let mut fields: HashMap<&str, &str> = HashMap::new();
        let mut checksum: Option<(usize, &str)> = None;
        let mut offset = 0;

        for (index, raw) in content.split_inclusive('\n').enumerate() {
            let line_start = offset;
            offset += raw.len();

            let line = raw.trim_end_matches(&['\n', '\r'][..]);
            if line.trim().is_empty() {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| MetadataError::MalformedLine {
                line: index + 1,
                content: line.to_string(),
            })?;

            if key == CHECKSUM_KEY {
                checksum = Some((line_start, value));
                break;
            }
            if fields.insert(key, value).is_some() {
                return Err(MetadataError::MalformedLine {
                    line: index + 1,
                    content: line.to_string(),
                });
            }
        }

        if !fields.contains_key("STRATEGY") {
            return Err(MetadataError::MissingField { field: "STRATEGY" });
        }

        let version = fields.get("FORMAT_VERSION").copied().unwrap_or("none");
        if version.parse::<u32>().ok() != Some(FORMAT_VERSION) {
            return Err(MetadataError::UnsupportedVersion {
                found: version.to_string(),
                supported: FORMAT_VERSION,
            });
        }

        let (body_len, stored) = checksum.ok_or(MetadataError::MissingField {
            field: CHECKSUM_KEY,
        })?;
        let expected = u32::from_str_radix(stored.trim(), 16).map_err(|_| {
            MetadataError::InvalidField {
                field: CHECKSUM_KEY,
                value: stored.to_string(),
            }
        })?;
        let actual = crc32fast::hash(&content.as_bytes()[..body_len]);
        if expected != actual {
            return Err(MetadataError::ChecksumMismatch { expected, actual });
        }

        let fields = Fields(fields);
        let container = match fields.optional("CONTAINER_ID") {
            Some(id) => Some(ContainerIdentity {
                id: fields.parse_with("CONTAINER_ID", id, ContainerRef::new)?,
                name: fields.parse_with(
                    "CONTAINER_NAME",
                    fields.required("CONTAINER_NAME")?,
                    ContainerRef::new,
                )?,
                image: fields.required("IMAGE")?.to_string(),
            }),
            None => None,
        };

        Ok(Self {
            record_id: fields.required("RECORD_ID")?.to_string(),
            container,
            pid: fields.parse("PID")?,
            strategy: fields.parse("STRATEGY")?,
            created_at: fields.parse("CREATED_AT")?,
            images_dir: PathBuf::from(fields.required("IMAGES_DIR")?),
            flags: ResourceFlags {
                tcp_established: fields.parse("TCP_ESTABLISHED")?,
                ext_unix_sk: fields.parse("EXT_UNIX_SK")?,
                file_locks: fields.parse("FILE_LOCKS")?,
                shell_job: fields.parse("SHELL_JOB")?,
                orphan_pts_master: fields.parse("ORPHAN_PTS_MASTER")?,
            },
            checkpoint_name: fields.optional("CHECKPOINT_NAME").map(str::to_string),
        })
    }
}

struct Fields<'a>(HashMap<&'a str, &'a str>);

impl<'a> Fields<'a> {
    fn optional(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).copied()
    }

    fn required(&self, key: &'static str) -> Result<&'a str, MetadataError> {
        self.optional(key)
            .ok_or(MetadataError::MissingField { field: key })
    }

    fn parse<T: std::str::FromStr>(&self, key: &'static str) -> Result<T, MetadataError> {
        let value = self.required(key)?;
        value.parse().map_err(|_| MetadataError::InvalidField {
            field: key,
            value: value.to_string(),
        })
    }

    fn parse_with<T, E>(
        &self,
        key: &'static str,
        value: &str,
        f: impl FnOnce(String) -> Result<T, E>,
    ) -> Result<T, MetadataError> {
        f(value.to_string()).map_err(|_| MetadataError::InvalidField {
            field: key,
            value: value.to_string(),
        })
    }
}

/// A freshly created, still empty generation directory.
#[derive(Debug, Clone)]
pub struct Generation {
    pub record_id: String,
    pub dir: PathBuf,
}

/// A record together with the directory it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedRecord {
    pub dir: PathBuf,
    pub record: CheckpointRecord,
}

/// Checkpoint records under one destination directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new generation directory with a unique record id.
    pub fn allocate(&self) -> StasisResult<Generation> {
        fs::create_dir_all(&self.root).map_err(|e| StasisError::Io {
            context: "creating checkpoint directory",
            source: e,
        })?;

        let record_id = format!("{}-{}", unix_now(), Uuid::new_v4().simple());
        let dir = self.root.join(&record_id);
        fs::create_dir(&dir).map_err(|e| StasisError::Io {
            context: "creating checkpoint generation directory",
            source: e,
        })?;

        tracing::debug!(
            record_id = %record_id,
            dir = %dir.display(),
            "Allocated checkpoint generation"
        );

        Ok(Generation { record_id, dir })
    }

    /// Persist `record` into its generation and point `LATEST` at it.
    pub fn commit(&self, record: &CheckpointRecord) -> StasisResult<PathBuf> {
        let encoded = record.encode()?;
        let path = self.root.join(&record.record_id).join(RECORD_FILE);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    StasisError::from(MetadataError::AlreadyExists { path: path.clone() })
                }
                _ => StasisError::Io {
                    context: "creating checkpoint record",
                    source: e,
                },
            })?;
        file.write_all(encoded.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| StasisError::Io {
                context: "writing checkpoint record",
                source: e,
            })?;

        let staging = self.root.join(format!(".{}.{}", LATEST_FILE, record.record_id));
        fs::write(&staging, format!("{}\n", record.record_id))
            .and_then(|_| fs::rename(&staging, self.root.join(LATEST_FILE)))
            .map_err(|e| StasisError::Io {
                context: "updating LATEST pointer",
                source: e,
            })?;

        tracing::info!(
            record_id = %record.record_id,
            strategy = %record.strategy,
            path = %path.display(),
            "Checkpoint record committed"
        );

        Ok(path)
    }

    /// Directory holding the record for `dir`.
    ///
    /// `dir` may be a generation directory itself or a destination whose
    /// `LATEST` names one.
    pub fn resolve(dir: &Path) -> StasisResult<PathBuf> {
        if dir.join(RECORD_FILE).is_file() {
            return Ok(dir.to_path_buf());
        }

        let latest = match fs::read_to_string(dir.join(LATEST_FILE)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StasisError::MissingMetadata {
                    dir: dir.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(StasisError::Io {
                    context: "reading LATEST pointer",
                    source: e,
                })
            }
        };

        let record_id = latest.trim();
        let mut components = Path::new(record_id).components();
        let single_component = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_component {
            return Err(MetadataError::InvalidField {
                field: "LATEST",
                value: record_id.to_string(),
            }
            .into());
        }

        let generation = dir.join(record_id);
        if !generation.join(RECORD_FILE).is_file() {
            return Err(StasisError::MissingMetadata { dir: generation });
        }
        Ok(generation)
    }

    /// Resolve and decode the record for `dir`.
    pub fn load(dir: &Path) -> StasisResult<LoadedRecord> {
        let record_dir = Self::resolve(dir)?;
        let content = fs::read_to_string(record_dir.join(RECORD_FILE)).map_err(|e| {
            StasisError::Io {
                context: "reading checkpoint record",
                source: e,
            }
        })?;
        let record = CheckpointRecord::decode(&content)?;

        tracing::debug!(
            record_id = %record.record_id,
            strategy = %record.strategy,
            dir = %record_dir.display(),
            "Loaded checkpoint record"
        );

        Ok(LoadedRecord {
            dir: record_dir,
            record,
        })
    }
}

/// Current time in unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
