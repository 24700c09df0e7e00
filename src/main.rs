//! Lockutil: NFS-safe dot-file locking for mail spools.
//!
//! This is the main entry point for the `lockutil` CLI. It parses arguments,
//! runs the request, and reports errors with the classic exit codes.

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use lockutil::error::LockError;
use lockutil::exit_codes;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::ACTION_FAILED
            } else {
                exit_codes::SUCCESS
            };
            let _ = err.print();
            return ExitCode::from(code as u8);
        }
    };
    let quiet = cli.quiet;

    match commands::run(cli) {
        Ok(status) => ExitCode::from(status as u8),
        Err(err) => {
            // A failed check is an answer, not a problem.
            if !quiet && !matches!(err, LockError::NotLocked(_)) {
                eprintln!("lockutil: {}", err);
            }
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
