// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Stasis CLI
//!
//! Command-line interface for checkpointing and restoring processes and
//! containers.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use stasis_core::{Config, ConfigLoader};

mod commands;

/// Configuration file used when `--config` is not given.
const DEFAULT_CONFIG: &str = "stasis.yaml";

/// Stasis - checkpoint/restore orchestrator for processes and containers
#[derive(Parser)]
#[command(name = "stasis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path [default: stasis.yaml, if present]
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Checkpoint a process id or container into a directory
    #[command(alias = "cp")]
    Checkpoint {
        /// Process id or container name/id
        target: String,

        /// Checkpoint directory
        dir: PathBuf,

        /// Stop the source after the checkpoint instead of leaving it running
        #[arg(long)]
        relocate: bool,
    },

    /// Restore the newest checkpoint in a directory
    #[command(alias = "rs")]
    Restore {
        /// Checkpoint directory, or one checkpoint generation inside it
        dir: PathBuf,

        /// Container to restore into instead of the recorded one
        target: Option<String>,
    },

    /// Report what a process holds that affects checkpointing
    Probe {
        /// Process id
        pid: String,

        /// Print the profile as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Config {
    match ConfigLoader::load_or_default(path, Path::new(DEFAULT_CONFIG)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Failed to load configuration:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Checkpoint {
            target,
            dir,
            relocate,
        } => {
            let config = load_config(cli.config.as_deref());
            commands::checkpoint::execute(config, &target, dir, relocate).await
        }
        Commands::Restore { dir, target } => {
            let config = load_config(cli.config.as_deref());
            commands::restore::execute(config, dir, target.as_deref()).await
        }
        Commands::Probe { pid, json } => {
            let config = load_config(cli.config.as_deref());
            commands::probe::execute(&config, &pid, json).await
        }
        Commands::Validate { file } => commands::validate::execute(&file).await,
    }
}
