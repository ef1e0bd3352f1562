//! # Reconciliation Cycle
//!
//! One `pull` cycle brings the local mirror in line with the remote
//! manifest. The cycle is built to be interrupted: every step leaves the
//! mirror consistent, and anything left undone is picked up by the next
//! run.
//!
//! ## Steps
//!
//! 1. **Freshness**: unless forced, skip when the local manifest is at
//!    least as new as the remote one.
//! 2. **Load**: read both manifests (the local one under the manifest
//!    lock). An empty remote manifest aborts the run; an empty local one
//!    means every repository present on disk is re-checked.
//! 3. **Filter**: apply the include/exclude globs.
//! 4. **Classify** ([`classify`]): clone, update, skip, or refresh metadata.
//! 5. **Update** ([`update`]): fetch changed repositories on a bounded pool.
//! 6. **Clone** ([`clone`]): after the pool drains, clone missing
//!    repositories in reference order.
//! 7. **Purge** ([`purge`]): optionally delete repositories the manifest no
//!    longer lists, behind the purge guard.
//! 8. **Commit** ([`commit`]): fold the outcomes into a new local manifest
//!    and write it under the manifest lock.

pub mod classify;
pub mod clone;
pub mod commit;
pub mod purge;
pub mod update;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::exit_codes::RunStatus;
use crate::filter::{self, PathFilter};
use crate::fingerprint::ChangeDetector;
use crate::git::{self, GitOperations};
use crate::hook;
use crate::lock::LockRegistry;
use crate::manifest::{manifest_mtime, Manifest, ManifestEntry, ManifestLock, WriteOptions};
use crate::scan;

/// Per-run overrides of the `[pull]` configuration.
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Run even if the local manifest looks current.
    pub force: bool,
    /// Purge regardless of `pull.purge`.
    pub purge: bool,
    /// Purge even when the purge guard would refuse.
    pub force_purge: bool,
    pub threads: Option<usize>,
    pub pretty: bool,
    /// Show a progress bar for the update pool.
    pub progress: bool,
}

/// What happened to one repository during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Updated,
    Cloned,
    /// On-disk state already matched; no fetch was needed.
    AlreadyCurrent,
    /// Only owner or description changed.
    MetadataRefreshed,
    LockBusy,
    SyncFailed { error: String },
    /// Its reference was part of the same batch and did not clone.
    Blocked { reference: String },
    /// Not attempted because too many locks were contended.
    Deferred,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Updated
                | Outcome::Cloned
                | Outcome::AlreadyCurrent
                | Outcome::MetadataRefreshed
        )
    }
}

/// Outcome of a single task, owned by the worker that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub path: String,
    pub outcome: Outcome,
}

impl TaskOutcome {
    pub fn new(path: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            path: path.into(),
            outcome,
        }
    }
}

/// Everything a worker needs to operate on repositories.
///
/// Shared by reference across the update pool, so it only holds
/// thread-safe handles.
pub struct PullContext {
    pub toplevel: PathBuf,
    pub site: String,
    pub git: Arc<dyn GitOperations>,
    pub detector: ChangeDetector,
    pub locks: LockRegistry,
    pub hook: Option<PathBuf>,
    pub threads: usize,
    pub progress: ProgressBar,
}

impl PullContext {
    pub fn new(config: &Config, git: Arc<dyn GitOperations>, threads: usize) -> Result<Self> {
        let ignore = filter::compile(&config.pull.ignore_refs)?;
        Ok(Self {
            toplevel: config.core.toplevel.clone(),
            site: config.remote.site.clone(),
            detector: ChangeDetector::new(git.clone(), ignore),
            git,
            locks: LockRegistry::new(),
            hook: config.pull.post_update_hook.clone(),
            threads,
            progress: ProgressBar::hidden(),
        })
    }

    pub fn repo_path(&self, path: &str) -> PathBuf {
        config::repo_path(&self.toplevel, path)
    }

    pub fn exists(&self, path: &str) -> bool {
        git::is_bare_repo(&self.repo_path(path))
    }

    /// Applies owner and description from `entry` if they differ on disk.
    pub(crate) fn apply_metadata(&self, repo: &Path, entry: &ManifestEntry) {
        if let Some(owner) = &entry.owner {
            let current = self.git.owner(repo).ok().flatten();
            if current.as_deref() != Some(owner.as_str()) {
                if let Err(e) = self.git.set_owner(repo, owner) {
                    warn!("Cannot set owner of {}: {}", repo.display(), e);
                }
            }
        }
        if let Some(description) = &entry.description {
            if git::read_description(repo).as_deref() != Some(description.as_str()) {
                if let Err(e) = git::write_description(repo, description) {
                    warn!("Cannot set description of {}: {}", repo.display(), e);
                }
            }
        }
    }

    /// Post-fetch housekeeping shared by updates and clones.
    pub(crate) fn finish_repo(&self, repo: &Path, entry: &ManifestEntry) {
        self.apply_metadata(repo, entry);
        if let Err(e) = git::write_agefile(repo, entry.modified) {
            warn!("Cannot write agefile for {}: {}", repo.display(), e);
        }
        for alias in &entry.symlinks {
            if let Err(e) = git::ensure_symlink(repo, &self.repo_path(alias)) {
                warn!("Cannot create alias {} for {}: {}", alias, repo.display(), e);
            }
        }
        if let Some(hook) = &self.hook {
            hook::run_hook(hook, repo);
        }
    }
}

/// Counts reported at the end of a cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullSummary {
    pub updated: usize,
    pub cloned: usize,
    pub unchanged: usize,
    pub already_current: usize,
    pub metadata_refreshed: usize,
    pub lock_busy: usize,
    pub failed: usize,
    pub blocked: usize,
    pub deferred: usize,
    pub purged: usize,
    /// Purge candidates skipped because they were locked or could not be
    /// removed.
    pub purge_skipped: usize,
    /// Percentage of local repositories the refused purge would have removed.
    pub purge_refused: Option<f64>,
    pub culled: usize,
}

impl PullSummary {
    fn nothing_to_do() -> Self {
        Self::default()
    }

    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Updated => self.updated += 1,
            Outcome::Cloned => self.cloned += 1,
            Outcome::AlreadyCurrent => self.already_current += 1,
            Outcome::MetadataRefreshed => self.metadata_refreshed += 1,
            Outcome::LockBusy => self.lock_busy += 1,
            Outcome::SyncFailed { .. } => self.failed += 1,
            Outcome::Blocked { .. } => self.blocked += 1,
            Outcome::Deferred => self.deferred += 1,
        }
    }

    /// True when something must be retried next cycle.
    pub fn has_failures(&self) -> bool {
        self.lock_busy + self.failed + self.blocked + self.deferred + self.purge_skipped > 0
            || self.purge_refused.is_some()
    }

    pub fn changes(&self) -> usize {
        self.updated + self.cloned + self.already_current + self.metadata_refreshed + self.purged
    }

    pub fn status(&self) -> RunStatus {
        if self.has_failures() {
            RunStatus::CompletedWithFailures
        } else if self.changes() == 0 {
            RunStatus::NothingToDo
        } else {
            RunStatus::ChangesApplied
        }
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    let style =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Runs one reconciliation cycle.
pub fn run_pull(
    config: &Config,
    git: Arc<dyn GitOperations>,
    opts: &PullOptions,
) -> Result<PullSummary> {
    let remote_path = config.remote_manifest()?;
    let local_path = config.local_manifest();

    let remote_mtime = manifest_mtime(&remote_path);
    if !opts.force {
        if let (Some(remote), Some(local)) = (remote_mtime, manifest_mtime(&local_path)) {
            if local >= remote {
                info!("Local manifest is not older than the remote one; nothing to do");
                return Ok(PullSummary::nothing_to_do());
            }
        }
    }

    let mut remote = Manifest::load(&remote_path);
    if remote.is_empty() {
        return Err(Error::EmptyManifest { path: remote_path });
    }

    let local = {
        let _lock = ManifestLock::acquire(&local_path)?;
        Manifest::load(&local_path)
    };
    if local.is_empty() {
        info!("Local manifest is empty; checking every repository present on disk");
    }

    let filter = PathFilter::new(&config.pull.include, &config.pull.exclude)?;
    let mut summary = PullSummary {
        culled: filter.apply(&mut remote),
        ..PullSummary::default()
    };
    if summary.culled > 0 {
        debug!("Include/exclude filters dropped {} repositories", summary.culled);
    }

    let threads = opts.threads.unwrap_or(config.pull.pull_threads).max(1);
    let mut ctx = PullContext::new(config, git, threads)?;

    let plan = classify::classify(&remote, &local, |path| ctx.exists(path));
    info!(
        "{} to update, {} to clone, {} unchanged",
        plan.updates.len(),
        plan.clones.len(),
        plan.unchanged.len()
    );
    summary.unchanged = plan.unchanged.len();

    let mut outcomes = classify::refresh_metadata(&plan.metadata_only, &remote, &ctx);

    if opts.progress && !plan.updates.is_empty() {
        ctx.progress = progress_bar(plan.updates.len());
    }
    let report = update::run_updates(plan.updates, &ctx)?;
    ctx.progress.finish_and_clear();
    let lock_failures = report.lock_failures;
    outcomes.extend(report.outcomes);

    outcomes.extend(clone::run_clones(&plan.clones, &remote, &ctx, lock_failures));

    if opts.purge || config.pull.purge {
        let scan = scan::find_repositories(&ctx.toplevel);
        let present: Vec<String> = scan
            .repos
            .iter()
            .filter_map(|repo| scan::manifest_path(&ctx.toplevel, repo))
            .collect();
        let candidates = purge::purge_candidates(&present, &remote);
        let report = purge::run_purge(
            candidates,
            present.len(),
            config.pull.purgeprotect,
            opts.force_purge,
            &ctx,
        );
        summary.purged = report.purged.len();
        summary.purge_skipped = report.skipped.len();
        if !report.decision.allowed {
            summary.purge_refused = Some(report.decision.percent());
        }
    }

    for outcome in &outcomes {
        summary.record(&outcome.outcome);
    }

    {
        let _lock = ManifestLock::acquire(&local_path)?;
        let previous = Manifest::load(&local_path);
        let mut next = commit::fold(&remote, &previous, &outcomes);
        let fallback = remote.latest_modified().unwrap_or_default();
        let mtime =
            commit::freshness_marker(remote_mtime.unwrap_or(fallback), summary.has_failures());
        if next.is_empty() {
            warn!("No repository reached a known state; leaving the local manifest untouched");
        } else {
            next.write(
                &local_path,
                &WriteOptions {
                    pretty: opts.pretty || config.pull.pretty,
                    mtime: Some(mtime),
                },
            )?;
        }
    }

    Ok(summary)
}
