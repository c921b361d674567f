//! sshelf - Main entry point.
//!
//! Usage: sshelf [--config FILE] <COMMAND>
//!
//! Commands: add, get, update, delete, list, connect, exec.
//! Run `sshelf help <COMMAND>` for the flags of each.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use sshelf::cli::{self, Cli, Context};
use sshelf::config::Config;
use sshelf::logging;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sshelf: cannot load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Logging is best effort; a read-only home must not block the CLI.
    if let Err(e) = logging::init(&config.log_config) {
        eprintln!("sshelf: logging disabled: {}", e);
    }

    let ctx = match Context::from_config(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Startup failed: {}", e);
            eprintln!("sshelf: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Not locked: the threaded relay writes to stdout from its own thread.
    let mut stdout = io::stdout();
    match cli::dispatch(cli.command, &ctx, &mut stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("sshelf: {}", e);
            ExitCode::FAILURE
        }
    }
}
