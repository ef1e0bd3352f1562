//! Sorting remote entries into clone, update, skip and metadata-only work.

use log::debug;

use super::update::UpdateTask;
use super::{Outcome, PullContext, TaskOutcome};
use crate::fingerprint::compare_entries;
use crate::manifest::Manifest;

/// The work a cycle has to do, by kind.
#[derive(Debug, Default)]
pub struct Plan {
    pub clones: Vec<String>,
    pub updates: Vec<UpdateTask>,
    pub unchanged: Vec<String>,
    /// Content is current but owner or description changed.
    pub metadata_only: Vec<String>,
}

/// Classifies every entry of the (already filtered) remote manifest.
///
/// `exists` reports whether a repository is present on disk. Entries
/// missing locally are cloned whatever the local manifest says.
pub fn classify(remote: &Manifest, local: &Manifest, exists: impl Fn(&str) -> bool) -> Plan {
    let mut plan = Plan::default();
    for (path, entry) in remote.iter() {
        if !exists(path) {
            plan.clones.push(path.clone());
            continue;
        }
        let previous = local.get(path);
        let status = compare_entries(previous, entry);
        if status.needs_work() {
            debug!("{}: {:?}, queueing update", path, status);
            plan.updates.push(UpdateTask::new(path.clone(), entry.clone()));
        } else if previous.is_some_and(|p| p.metadata_differs(entry)) {
            plan.metadata_only.push(path.clone());
        } else {
            plan.unchanged.push(path.clone());
        }
    }
    plan
}

/// Applies owner/description changes without fetching.
pub fn refresh_metadata(
    paths: &[String],
    remote: &Manifest,
    ctx: &PullContext,
) -> Vec<TaskOutcome> {
    paths
        .iter()
        .filter_map(|path| {
            let entry = remote.get(path)?;
            let repo = ctx.repo_path(path);
            let outcome = match ctx.locks.try_lock(&repo) {
                Ok(Some(_lock)) => {
                    ctx.apply_metadata(&repo, entry);
                    Outcome::MetadataRefreshed
                }
                Ok(None) => Outcome::LockBusy,
                Err(e) => Outcome::SyncFailed {
                    error: e.to_string(),
                },
            };
            Some(TaskOutcome::new(path.clone(), outcome))
        })
        .collect()
}
