// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validated once at the start of every operation. Any invalid field results
//! in a HardValidationError that prevents the operation from starting.
//! Every field has a default, so an empty document is a valid configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HardValidationError, StasisError, StasisResult};
use crate::types::Strategy;

/// Upper bound on the runtime stop grace period.
const MAX_STOP_GRACE_SECS: u64 = 300;
/// Upper bound on verification polling attempts.
const MAX_VERIFY_ATTEMPTS: u32 = 600;
/// Upper bound on the backoff between verification polls.
const MAX_VERIFY_BACKOFF_MS: u64 = 60_000;

/// Raw engine configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEngineConfig {
    #[serde(default)]
    binary: Option<String>,
    #[serde(default = "default_log_level")]
    log_level: u32,
    #[serde(default = "default_ghost_limit")]
    ghost_limit_bytes: u32,
}

fn default_log_level() -> u32 {
    4
}

fn default_ghost_limit() -> u32 {
    1024 * 1024 // 1MB of inlined invisible-file content
}

impl Default for RawEngineConfig {
    fn default() -> Self {
        Self {
            binary: None,
            log_level: default_log_level(),
            ghost_limit_bytes: default_ghost_limit(),
        }
    }
}

/// Raw container runtime configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuntimeConfig {
    #[serde(default = "default_runtime_binary")]
    binary: String,
    #[serde(default = "default_stop_grace")]
    stop_grace_secs: u64,
    #[serde(default = "default_placeholder")]
    placeholder_command: Vec<String>,
}

fn default_runtime_binary() -> String {
    "docker".to_string()
}

fn default_stop_grace() -> u64 {
    10
}

fn default_placeholder() -> Vec<String> {
    vec!["sleep".to_string(), "infinity".to_string()]
}

impl Default for RawRuntimeConfig {
    fn default() -> Self {
        Self {
            binary: default_runtime_binary(),
            stop_grace_secs: default_stop_grace(),
            placeholder_command: default_placeholder(),
        }
    }
}

/// Raw fallback chain configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStrategyConfig {
    #[serde(default = "default_container_chain")]
    container: Vec<Strategy>,
    #[serde(default = "default_process_chain")]
    process: Vec<Strategy>,
}

fn default_container_chain() -> Vec<Strategy> {
    vec![Strategy::DirectContainerAware, Strategy::DirectMinimal]
}

fn default_process_chain() -> Vec<Strategy> {
    vec![Strategy::DirectMinimal]
}

impl Default for RawStrategyConfig {
    fn default() -> Self {
        Self {
            container: default_container_chain(),
            process: default_process_chain(),
        }
    }
}

/// Raw verification configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVerifyConfig {
    #[serde(default = "default_verify_attempts")]
    attempts: u32,
    #[serde(default = "default_verify_backoff")]
    backoff_ms: u64,
}

fn default_verify_attempts() -> u32 {
    10
}

fn default_verify_backoff() -> u64 {
    500
}

impl Default for RawVerifyConfig {
    fn default() -> Self {
        Self {
            attempts: default_verify_attempts(),
            backoff_ms: default_verify_backoff(),
        }
    }
}

/// Raw hook script configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHookConfig {
    pre_dump: Option<String>,
    post_dump: Option<String>,
    pre_restore: Option<String>,
    post_restore: Option<String>,
    post_resume: Option<String>,
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    engine: RawEngineConfig,
    #[serde(default)]
    runtime: RawRuntimeConfig,
    #[serde(default)]
    strategies: RawStrategyConfig,
    #[serde(default)]
    verify: RawVerifyConfig,
    #[serde(default)]
    hooks: RawHookConfig,
    #[serde(default)]
    lock_dir: Option<String>,
    #[serde(default = "default_proc_root")]
    proc_root: String,
}

fn default_proc_root() -> String {
    "/proc".to_string()
}

/// Shared by every stasis process on the host, so concurrent CLI runs see
/// each other's target locks.
fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("stasis-locks")
}

/// Validated engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit engine binary; searched for when unset.
    pub binary: Option<PathBuf>,
    pub log_level: u32,
    pub ghost_limit_bytes: u32,
}

/// Validated container runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub binary: PathBuf,
    pub stop_grace: Duration,
    pub placeholder_command: Vec<String>,
}

/// Validated fallback chains.
#[derive(Debug, Clone)]
pub struct StrategyChains {
    pub container: Vec<Strategy>,
    pub process: Vec<Strategy>,
}

impl StrategyChains {
    /// Chain for a target kind.
    pub fn for_target(&self, is_container: bool) -> &[Strategy] {
        if is_container {
            &self.container
        } else {
            &self.process
        }
    }
}

impl Default for StrategyChains {
    fn default() -> Self {
        Self {
            container: default_container_chain(),
            process: default_process_chain(),
        }
    }
}

/// Validated verification bounds.
#[derive(Debug, Clone, Copy)]
pub struct VerifyConfig {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Validated hook scripts, one optional script per lifecycle phase.
#[derive(Debug, Clone, Default)]
pub struct HookConfig {
    pub pre_dump: Option<PathBuf>,
    pub post_dump: Option<PathBuf>,
    pub pre_restore: Option<PathBuf>,
    pub post_restore: Option<PathBuf>,
    pub post_resume: Option<PathBuf>,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub runtime: RuntimeConfig,
    pub strategies: StrategyChains,
    pub verify: VerifyConfig,
    pub hooks: HookConfig,
    /// Directory holding per-target lock files.
    pub lock_dir: PathBuf,
    pub proc_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                binary: None,
                log_level: default_log_level(),
                ghost_limit_bytes: default_ghost_limit(),
            },
            runtime: RuntimeConfig {
                binary: PathBuf::from(default_runtime_binary()),
                stop_grace: Duration::from_secs(default_stop_grace()),
                placeholder_command: default_placeholder(),
            },
            strategies: StrategyChains::default(),
            verify: VerifyConfig {
                attempts: default_verify_attempts(),
                backoff: Duration::from_millis(default_verify_backoff()),
            },
            hooks: HookConfig::default(),
            lock_dir: default_lock_dir(),
            proc_root: PathBuf::from(default_proc_root()),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> StasisResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(StasisError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| StasisError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load the named file, or defaults when `path` is the implicit default
    /// and does not exist.
    pub fn load_or_default(path: Option<&Path>, implicit: &Path) -> StasisResult<Config> {
        match path {
            Some(explicit) => Self::load_file(explicit),
            None if implicit.exists() => Self::load_file(implicit),
            None => {
                tracing::debug!(
                    path = %implicit.display(),
                    "No configuration file, using defaults"
                );
                Ok(Config::default())
            }
        }
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> StasisResult<Config> {
        // An empty document deserializes to unit, not a mapping.
        if content.trim().is_empty() {
            return Ok(Config::default());
        }

        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| StasisError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> StasisResult<Config> {
        let engine = Self::validate_engine(raw.engine)?;
        let runtime = Self::validate_runtime(raw.runtime)?;
        let strategies = Self::validate_strategies(raw.strategies)?;
        let verify = Self::validate_verify(raw.verify)?;
        let hooks = Self::validate_hooks(raw.hooks)?;

        if raw.proc_root.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "proc_root",
                value: String::new(),
                reason: "proc_root cannot be empty".to_string(),
            }
            .into());
        }

        let lock_dir = match raw.lock_dir {
            Some(dir) if dir.is_empty() => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "lock_dir",
                    value: dir,
                    reason: "lock_dir cannot be empty; omit it to use the default".to_string(),
                }
                .into());
            }
            Some(dir) => PathBuf::from(dir),
            None => default_lock_dir(),
        };

        Ok(Config {
            engine,
            runtime,
            strategies,
            verify,
            hooks,
            lock_dir,
            proc_root: PathBuf::from(raw.proc_root),
        })
    }

    /// Validate engine configuration.
    fn validate_engine(raw: RawEngineConfig) -> StasisResult<EngineConfig> {
        if raw.log_level > 4 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "engine.log_level",
                value: raw.log_level.to_string(),
                reason: "Must be between 0 and 4".to_string(),
            }
            .into());
        }

        if raw.ghost_limit_bytes == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "engine.ghost_limit_bytes",
                value: "0".to_string(),
                reason: "Ghost limit must be greater than 0".to_string(),
            }
            .into());
        }

        if matches!(raw.binary.as_deref(), Some("")) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "engine.binary",
                value: String::new(),
                reason: "Engine binary path cannot be empty; omit it to search PATH".to_string(),
            }
            .into());
        }

        Ok(EngineConfig {
            binary: raw.binary.map(PathBuf::from),
            log_level: raw.log_level,
            ghost_limit_bytes: raw.ghost_limit_bytes,
        })
    }

    /// Validate container runtime configuration.
    fn validate_runtime(raw: RawRuntimeConfig) -> StasisResult<RuntimeConfig> {
        if raw.binary.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "runtime.binary",
                value: String::new(),
                reason: "Runtime binary cannot be empty".to_string(),
            }
            .into());
        }

        if raw.stop_grace_secs > MAX_STOP_GRACE_SECS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "runtime.stop_grace_secs",
                value: raw.stop_grace_secs.to_string(),
                reason: format!("Must not exceed {} seconds", MAX_STOP_GRACE_SECS),
            }
            .into());
        }

        if raw.placeholder_command.is_empty() || raw.placeholder_command[0].is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "placeholder_command",
                context: "runtime section".to_string(),
            }
            .into());
        }

        Ok(RuntimeConfig {
            binary: PathBuf::from(raw.binary),
            stop_grace: Duration::from_secs(raw.stop_grace_secs),
            placeholder_command: raw.placeholder_command,
        })
    }

    /// Validate both fallback chains.
    fn validate_strategies(raw: RawStrategyConfig) -> StasisResult<StrategyChains> {
        Self::validate_chain("container", &raw.container)?;
        Self::validate_chain("process", &raw.process)?;

        if raw.process.contains(&Strategy::ContainerNativeDelegate) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "strategies.process",
                value: Strategy::ContainerNativeDelegate.to_string(),
                reason: "Bare processes have no container runtime to delegate to".to_string(),
            }
            .into());
        }

        Ok(StrategyChains {
            container: raw.container,
            process: raw.process,
        })
    }

    fn validate_chain(chain: &'static str, strategies: &[Strategy]) -> StasisResult<()> {
        if strategies.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: format!("The {} fallback chain needs at least one strategy", chain),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for strategy in strategies {
            if !seen.insert(*strategy) {
                return Err(HardValidationError::DuplicateStrategy {
                    chain,
                    strategy: *strategy,
                }
                .into());
            }
        }

        Ok(())
    }

    /// Validate verification bounds.
    fn validate_verify(raw: RawVerifyConfig) -> StasisResult<VerifyConfig> {
        if raw.attempts == 0 || raw.attempts > MAX_VERIFY_ATTEMPTS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "verify.attempts",
                value: raw.attempts.to_string(),
                reason: format!("Must be between 1 and {}", MAX_VERIFY_ATTEMPTS),
            }
            .into());
        }

        if raw.backoff_ms > MAX_VERIFY_BACKOFF_MS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "verify.backoff_ms",
                value: raw.backoff_ms.to_string(),
                reason: format!("Must not exceed {}ms", MAX_VERIFY_BACKOFF_MS),
            }
            .into());
        }

        Ok(VerifyConfig {
            attempts: raw.attempts,
            backoff: Duration::from_millis(raw.backoff_ms),
        })
    }

    /// Validate hook scripts. Paths are not checked for existence here;
    /// a missing script fails the phase that runs it.
    fn validate_hooks(raw: RawHookConfig) -> StasisResult<HookConfig> {
        let check = |field: &'static str, value: Option<String>| -> StasisResult<Option<PathBuf>> {
            match value {
                Some(path) if path.is_empty() => Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: path,
                    reason: "Hook path cannot be empty".to_string(),
                }
                .into()),
                other => Ok(other.map(PathBuf::from)),
            }
        };

        Ok(HookConfig {
            pre_dump: check("hooks.pre_dump", raw.pre_dump)?,
            post_dump: check("hooks.post_dump", raw.post_dump)?,
            pre_restore: check("hooks.pre_restore", raw.pre_restore)?,
            post_restore: check("hooks.post_restore", raw.post_restore)?,
            post_resume: check("hooks.post_resume", raw.post_resume)?,
        })
    }
}
