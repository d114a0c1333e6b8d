// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! yard: client for the Switchyard broker.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;
mod output;

use clap::Parser;
use client::CliError;
use commands::Command;
use yard_wire::ErrorKind;

#[derive(Parser, Debug)]
#[command(name = "yard", about = "Switchyard job broker client", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

fn main() {
    let args = Args::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("yard: cannot start runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(commands::run(args.command)) {
        eprintln!("yard: {e}");
        std::process::exit(process_exit_code(&e));
    }
}

/// Stable process exit codes for scripting, derived from the failure
/// domain: 2 means the broker was unreachable, 3 the request never made
/// sense, 4-8 mirror the protocol error kinds, 9 is a broker-side or
/// protocol surprise.
fn process_exit_code(err: &CliError) -> i32 {
    match err {
        CliError::Unreachable(_) => 2,
        CliError::Usage(_) => 3,
        CliError::Broker { kind, .. } => match kind {
            ErrorKind::Validation => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::Conflict => 5,
            ErrorKind::WorkerProtocolViolation => 6,
            ErrorKind::RateLimited => 7,
            ErrorKind::StoreUnavailable => 8,
            ErrorKind::Internal => 9,
        },
        CliError::Unexpected(_) => 9,
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
