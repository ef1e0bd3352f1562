//! Folding cycle outcomes into the next local manifest.
//!
//! The local manifest records what this mirror actually holds. It starts
//! from the filtered remote manifest; every repository that did not reach
//! its remote state gets its previous local entry back, or is left out if
//! it never had one. A cycle with any failure stamps the manifest slightly
//! older than the remote one so the next cycle is not skipped as current.

use log::debug;

use super::TaskOutcome;
use crate::manifest::Manifest;

/// Builds the manifest to record after a cycle.
pub fn fold(remote: &Manifest, previous: &Manifest, outcomes: &[TaskOutcome]) -> Manifest {
    let mut next = remote.clone();
    for task in outcomes.iter().filter(|t| !t.outcome.is_success()) {
        match previous.get(&task.path) {
            Some(entry) => {
                debug!("{}: keeping previous manifest entry", task.path);
                next.insert(task.path.clone(), entry.clone());
            }
            None => {
                debug!("{}: not recorded until it syncs", task.path);
                next.remove(&task.path);
            }
        }
    }
    next
}

/// Modification time to stamp on the written manifest.
pub fn freshness_marker(remote_mtime: i64, had_failures: bool) -> i64 {
    if had_failures {
        remote_mtime - 1
    } else {
        remote_mtime
    }
}
