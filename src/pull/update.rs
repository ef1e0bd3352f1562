//! # Update Pool
//!
//! Fetches every repository classified as changed on a rayon pool of
//! `pull_threads` workers. Each worker returns an owned [`TaskOutcome`];
//! the coordinator only looks at them once the pool has drained, so there
//! is no shared mutable state between workers beyond the lock registry.
//!
//! A worker skips its repository when the lock is taken. Before fetching it
//! recomputes the fingerprint, since another process may have brought the
//! repository up to date since the manifest was read.

use log::{debug, error, info, warn};
use rayon::prelude::*;

use super::{Outcome, PullContext, TaskOutcome};
use crate::error::Result;
use crate::fingerprint::{ChangeStatus, Recorded};
use crate::manifest::ManifestEntry;

/// One repository to bring up to date with its remote entry.
#[derive(Debug, Clone)]
pub struct UpdateTask {
    pub path: String,
    pub target: ManifestEntry,
}

impl UpdateTask {
    pub fn new(path: impl Into<String>, target: ManifestEntry) -> Self {
        Self {
            path: path.into(),
            target,
        }
    }
}

/// Outcomes of the update pool.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub outcomes: Vec<TaskOutcome>,
    pub lock_failures: usize,
    pub sync_failures: usize,
}

impl UpdateReport {
    fn from_outcomes(outcomes: Vec<TaskOutcome>) -> Self {
        let lock_failures = outcomes
            .iter()
            .filter(|o| o.outcome == Outcome::LockBusy)
            .count();
        let sync_failures = outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::SyncFailed { .. }))
            .count();
        Self {
            outcomes,
            lock_failures,
            sync_failures,
        }
    }
}

/// Runs all update tasks and waits for them to finish.
pub fn run_updates(tasks: Vec<UpdateTask>, ctx: &PullContext) -> Result<UpdateReport> {
    if tasks.is_empty() {
        return Ok(UpdateReport::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.threads)
        .thread_name(|i| format!("pull-{}", i))
        .build()?;

    let outcomes: Vec<TaskOutcome> = pool.install(|| {
        tasks
            .par_iter()
            .map(|task| {
                let outcome = update_one(task, ctx);
                ctx.progress.inc(1);
                outcome
            })
            .collect()
    });

    let report = UpdateReport::from_outcomes(outcomes);
    debug!(
        "Update pool drained: {} tasks, {} locked, {} failed",
        report.outcomes.len(),
        report.lock_failures,
        report.sync_failures
    );
    Ok(report)
}

fn update_one(task: &UpdateTask, ctx: &PullContext) -> TaskOutcome {
    let repo = ctx.repo_path(&task.path);
    let _lock = match ctx.locks.try_lock(&repo) {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            info!("{} is locked, will retry next cycle", task.path);
            return TaskOutcome::new(&task.path, Outcome::LockBusy);
        }
        Err(e) => {
            error!("Cannot lock {}: {}", task.path, e);
            return TaskOutcome::new(
                &task.path,
                Outcome::SyncFailed {
                    error: e.to_string(),
                },
            );
        }
    };

    if let Some(expected) = &task.target.fingerprint {
        let recorded = Recorded::Fingerprint(expected.clone());
        if ctx.detector.detect(&repo, &recorded) == ChangeStatus::Unchanged {
            debug!("{} already matches the manifest", task.path);
            ctx.apply_metadata(&repo, &task.target);
            return TaskOutcome::new(&task.path, Outcome::AlreadyCurrent);
        }
    }

    if let Err(e) = ctx.git.fetch(&repo) {
        error!("Updating {} failed: {}", task.path, e);
        return TaskOutcome::new(
            &task.path,
            Outcome::SyncFailed {
                error: e.to_string(),
            },
        );
    }

    if let Some(expected) = &task.target.fingerprint {
        match ctx.detector.fingerprint(&repo) {
            Ok(Some(actual)) if &actual != expected => {
                debug!("{} moved on upstream since the manifest was written", task.path);
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot fingerprint {} after update: {}", task.path, e),
        }
    }

    ctx.finish_repo(&repo, &task.target);
    info!("Updated {}", task.path);
    TaskOutcome::new(&task.path, Outcome::Updated)
}
