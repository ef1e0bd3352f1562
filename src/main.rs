//! # Repository Mirror CLI
//!
//! This is the binary entry point for the `repo-mirror` command-line tool.
//!
//! It parses arguments with `clap`, dispatches to a command, and turns the
//! command's result into a process exit code (see
//! [`repo_mirror::exit_codes`]). Errors returned from a command are printed
//! by the runtime and exit with status 1.
//!
//! All mirroring logic lives in the `repo_mirror` library crate; the binary
//! is a thin wrapper around it.

mod cli;
mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<ExitCode> {
    let cli = cli::Cli::parse();
    cli.execute()
}
