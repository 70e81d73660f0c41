// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `stasis validate` command - Validate configuration file.

use std::path::Path;

use stasis_core::{ConfigLoader, Strategy};

fn chain(strategies: &[Strategy]) -> String {
    strategies
        .iter()
        .map(Strategy::name)
        .collect::<Vec<_>>()
        .join(" → ")
}

pub async fn execute(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file.display(), "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Engine:");
            match &config.engine.binary {
                Some(binary) => println!("  Binary:       {}", binary.display()),
                None => println!("  Binary:       (search PATH and standard locations)"),
            }
            println!("  Log Level:    {}", config.engine.log_level);
            println!("  Ghost Limit:  {} bytes", config.engine.ghost_limit_bytes);
            println!();
            println!("Runtime:");
            println!("  Binary:       {}", config.runtime.binary.display());
            println!("  Stop Grace:   {}s", config.runtime.stop_grace.as_secs());
            println!("  Placeholder:  {}", config.runtime.placeholder_command.join(" "));
            println!();
            println!("Strategies:");
            println!("  Container:    {}", chain(&config.strategies.container));
            println!("  Process:      {}", chain(&config.strategies.process));
            println!();
            println!(
                "Verification:   {} checks, {}ms apart",
                config.verify.attempts,
                config.verify.backoff.as_millis()
            );
            println!("Lock Directory: {}", config.lock_dir.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
