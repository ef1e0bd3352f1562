//! # Pull Command Implementation
//!
//! Runs one reconciliation cycle: update changed repositories, clone new
//! ones in reference order, optionally purge ones the remote manifest no
//! longer lists, and record the result in the local manifest.
//!
//! The exit status tells the caller whether to expect a retry:
//! 0 when changes were applied, 3 when some repositories failed, were
//! locked, or a purge was refused, and 4 when there was nothing to do.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use log::LevelFilter;

use repo_mirror::git::SystemGit;
use repo_mirror::output;
use repo_mirror::pull::{self, PullOptions};

use crate::cli::AppContext;

/// Bring the mirror in line with the remote manifest
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Run even if the local manifest is at least as new as the remote one.
    #[arg(long)]
    pub force: bool,

    /// Purge repositories no longer in the manifest, even if `pull.purge`
    /// is off.
    #[arg(long)]
    pub purge: bool,

    /// Purge even when more than `pull.purgeprotect` percent of local
    /// repositories would go. Implies `--purge`.
    #[arg(long)]
    pub force_purge: bool,

    /// Number of parallel update workers (overrides `pull.pull_threads`).
    #[arg(short = 'j', long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub threads: Option<u16>,

    /// Pretty-print the local manifest.
    #[arg(long)]
    pub pretty: bool,

    /// Do not show a progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

/// Execute the `pull` command.
pub fn execute(args: PullArgs, ctx: &AppContext) -> Result<ExitCode> {
    let options = PullOptions {
        force: args.force,
        purge: args.purge || args.force_purge,
        force_purge: args.force_purge,
        threads: args.threads.map(usize::from),
        pretty: args.pretty,
        progress: !args.no_progress
            && console::Term::stderr().is_term()
            && log::max_level() <= LevelFilter::Info,
    };

    let summary = pull::run_pull(&ctx.config, Arc::new(SystemGit), &options)?;

    for line in output::pull_summary_lines(&ctx.output, &summary) {
        println!("{}", line);
    }
    Ok(summary.status().into())
}
