// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `stasis checkpoint` command - Checkpoint a process or container.

use std::path::PathBuf;

use stasis_core::{
    CheckpointOrchestrator, CheckpointRequest, Config, CriuCli, DockerConnector, TargetSpec,
};

use super::{fail, CommandError};

pub async fn execute(
    config: Config,
    target: &str,
    dir: PathBuf,
    relocate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let spec: TargetSpec = match target.parse() {
        Ok(spec) => spec,
        Err(e) => fail(
            "Checkpoint",
            CommandError::InvalidArgument {
                argument: "target",
                reason: format!("{}", e),
            },
        ),
    };

    tracing::info!(target = %spec, dir = %dir.display(), relocate, "Checkpointing");

    let mut request = CheckpointRequest::new(spec, dir);
    if relocate {
        request = request.relocate();
    }

    let result = tokio::task::spawn_blocking(move || {
        let engine = CriuCli::new(&config.engine);
        let connector = DockerConnector::new(&config.runtime);
        CheckpointOrchestrator::new(&config, engine, connector).checkpoint(&request)
    })
    .await;

    let report = match result {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => fail("Checkpoint", e.into()),
        Err(e) => fail("Checkpoint", e.into()),
    };

    println!("✓ Checkpoint created");
    println!();
    println!("  Target:     {}", report.target);
    println!("  Strategy:   {}", report.record.strategy);
    println!("  Record:     {}", report.record_path.display());
    println!("  Images:     {}", report.record.images_dir.display());
    if let Some(name) = &report.record.checkpoint_name {
        println!("  Runtime checkpoint: {}", name);
    }
    println!("  Elapsed:    {}ms", report.elapsed.as_millis());

    if report.outcomes.len() > 1 {
        println!();
        println!("Attempts:");
        for outcome in &report.outcomes {
            println!("  - {}", outcome);
        }
    }

    Ok(())
}
