// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `stasis probe` command - Show a process's checkpoint-relevant resources.

use stasis_core::error::PreconditionError;
use stasis_core::{Config, ProcessId, ProcessProbe, StasisError};

use super::{fail, CommandError};

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub async fn execute(
    config: &Config,
    pid: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pid: ProcessId = match pid.parse() {
        Ok(pid) => pid,
        Err(e) => fail(
            "Probe",
            CommandError::InvalidArgument {
                argument: "pid",
                reason: format!("{}", e),
            },
        ),
    };

    tracing::debug!(pid = %pid, proc_root = %config.proc_root.display(), "Probing process");

    let profile = match ProcessProbe::new(&config.proc_root).probe(pid) {
        Ok(profile) => profile,
        Err(e) => fail("Probe", StasisError::from(PreconditionError::from(e)).into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    println!("Process {} ({})", profile.pid, profile.name);
    println!();
    println!("  State:              {}", profile.state);
    println!("  Checkpointable:     {}", yes_no(profile.state.is_checkpointable()));
    println!("  Shell job:          {}", yes_no(profile.is_shell_job));
    println!();
    println!("Resources:");
    println!("  Established TCP:    {}", yes_no(profile.has_established_tcp));
    println!("  Unix sockets:       {}", yes_no(profile.has_unix_sockets));
    println!("  Pipes:              {}", yes_no(profile.has_pipes));
    println!("  eventfd:            {}", yes_no(profile.has_eventfd));
    println!("  signalfd:           {}", yes_no(profile.has_signalfd));
    println!("  timerfd:            {}", yes_no(profile.has_timerfd));

    Ok(())
}
