// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

use stasis_core::StasisError;
use thiserror::Error;

pub mod checkpoint;
pub mod probe;
pub mod restore;
pub mod validate;

/// Failures a command reports before exiting non-zero.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Stasis(#[from] StasisError),

    #[error("Invalid argument {argument}: {reason}")]
    InvalidArgument { argument: &'static str, reason: String },

    #[error("Orchestration task aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

/// Print a failed command and exit with status 1.
///
/// Exhausted checkpoints list every strategy outcome in their message; the
/// most recent engine log follows it.
pub fn fail(operation: &str, err: CommandError) -> ! {
    eprintln!("✗ {} failed:", operation);
    eprintln!("  {}", err);

    if let CommandError::Stasis(inner) = &err {
        if let Some(diagnostic) = inner.engine_diagnostic() {
            eprintln!();
            eprintln!("Engine log:");
            for line in diagnostic.lines() {
                eprintln!("  {}", line);
            }
        }
    }

    std::process::exit(1);
}
