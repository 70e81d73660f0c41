// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `stasis restore` command - Restore the newest checkpoint in a directory.

use std::path::PathBuf;

use stasis_core::{
    Config, ContainerRef, CriuCli, DockerConnector, RestoreOrchestrator, RestoreRequest,
};

use super::{fail, CommandError};

pub async fn execute(
    config: Config,
    dir: PathBuf,
    target: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = RestoreRequest::new(dir);
    if let Some(target) = target {
        match ContainerRef::new(target) {
            Ok(reference) => request = request.into_container(reference),
            Err(e) => fail(
                "Restore",
                CommandError::InvalidArgument {
                    argument: "target",
                    reason: e.to_string(),
                },
            ),
        }
    }

    tracing::info!(
        dir = %request.checkpoint_dir.display(),
        target = ?request.target,
        "Restoring"
    );

    let result = tokio::task::spawn_blocking(move || {
        let engine = CriuCli::new(&config.engine);
        let connector = DockerConnector::new(&config.runtime);
        RestoreOrchestrator::new(&config, engine, connector).restore(&request)
    })
    .await;

    let report = match result {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => fail("Restore", e.into()),
        Err(e) => fail("Restore", e.into()),
    };

    println!("✓ Restore verified");
    println!();
    println!("  Checkpoint: {}", report.record_dir.display());
    println!("  Strategy:   {}", report.record.strategy);
    if let Some(container) = &report.container {
        println!("  Container:  {}", container);
    }
    println!("  PID:        {}", report.pid);
    println!(
        "  Verified:   after {} check(s), {}ms total",
        report.checks,
        report.elapsed.as_millis()
    );

    Ok(())
}
