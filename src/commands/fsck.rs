//! # Fsck Command Implementation
//!
//! Runs the check scheduler over every repository in the mirror. Meant to
//! be run daily; each repository is checked once per `fsck.frequency`
//! days, plus opportunistic quick checks when `fsck.quick_checks_max_min`
//! is set.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use repo_mirror::fsck;
use repo_mirror::git::SystemGit;
use repo_mirror::output;

use crate::cli::AppContext;

/// Run scheduled repository consistency checks
#[derive(Args, Debug)]
pub struct FsckArgs {
    /// Check every repository now and spread the next checks over the
    /// configured period.
    #[arg(long)]
    pub force: bool,
}

/// Execute the `fsck` command.
pub fn execute(args: FsckArgs, ctx: &AppContext) -> Result<ExitCode> {
    let report = fsck::run_fsck(&ctx.config, Arc::new(SystemGit), args.force)?;

    for line in output::fsck_report_lines(&ctx.output, &report) {
        println!("{}", line);
    }
    Ok(report.status().into())
}
