//! # Manifest Command Implementation
//!
//! Regenerates the local manifest from the repositories actually present
//! under `core.toplevel`, so that this mirror can serve as the upstream of
//! another one. Fingerprints that did not change keep their previous
//! modification time, and the file's mtime is stamped with the newest
//! modification time it lists.
//!
//! With `--check`, the existing manifest is only validated: it must parse
//! and list at least one repository.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use log::info;

use repo_mirror::exit_codes::RunStatus;
use repo_mirror::filter;
use repo_mirror::fingerprint::ChangeDetector;
use repo_mirror::git::{GitOperations, SystemGit};
use repo_mirror::manifest::{Manifest, ManifestLock, WriteOptions};
use repo_mirror::output::emoji;
use repo_mirror::scan;

use crate::cli::AppContext;

/// Regenerate or validate the local manifest
#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Validate the existing manifest instead of regenerating it.
    #[arg(long)]
    pub check: bool,

    /// Pretty-print the manifest.
    #[arg(long)]
    pub pretty: bool,
}

/// Execute the `manifest` command.
pub fn execute(args: ManifestArgs, ctx: &AppContext) -> Result<ExitCode> {
    let path = ctx.config.local_manifest();

    if args.check {
        let manifest = Manifest::load_strict(&path)
            .with_context(|| format!("Cannot read manifest {}", path.display()))?;
        if manifest.is_empty() {
            bail!("Manifest {} lists no repositories", path.display());
        }
        println!(
            "{} {} lists {} repositories",
            emoji(&ctx.output, "✅", "[OK]"),
            path.display(),
            manifest.len()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let git: Arc<dyn GitOperations> = Arc::new(SystemGit);
    let detector = ChangeDetector::new(git.clone(), filter::compile(&ctx.config.pull.ignore_refs)?);

    let _lock = ManifestLock::acquire(&path)?;
    let previous = Manifest::load(&path);
    let mut manifest = scan::build_manifest(&ctx.config.core.toplevel, &previous, &detector, &git)?;

    if manifest == previous {
        info!("{} is already current", path.display());
        println!("{} Manifest is up to date", emoji(&ctx.output, "✅", "[OK]"));
        return Ok(RunStatus::NothingToDo.into());
    }

    let options = WriteOptions {
        pretty: args.pretty || ctx.config.pull.pretty,
        mtime: manifest.latest_modified(),
    };
    manifest.write(&path, &options)?;
    println!(
        "{} Wrote {} repositories to {}",
        emoji(&ctx.output, "📝", "[WROTE]"),
        manifest.len(),
        path.display()
    );
    Ok(RunStatus::ChangesApplied.into())
}
