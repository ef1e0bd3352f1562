//! # Purge Guard
//!
//! Deletes local repositories the remote manifest no longer lists. A
//! truncated or mis-filtered manifest would otherwise wipe the mirror, so
//! the purge is refused outright when the candidates reach `purgeprotect`
//! percent of the local repositories, unless forced.

use std::collections::BTreeSet;
use std::fs;

use log::{info, warn};

use super::PullContext;
use crate::error::Error;
use crate::manifest::Manifest;

/// Whether a purge may proceed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurgeDecision {
    pub candidates: usize,
    pub total: usize,
    pub threshold: u32,
    pub allowed: bool,
}

impl PurgeDecision {
    /// Refuses when `candidates / total >= threshold%`, compared exactly.
    pub fn evaluate(candidates: usize, total: usize, threshold: u32, force: bool) -> Self {
        let breach = total > 0
            && (candidates as u128) * 100 >= u128::from(threshold) * (total as u128);
        Self {
            candidates,
            total,
            threshold,
            allowed: candidates == 0 || force || !breach,
        }
    }

    /// Share of local repositories that would be purged, in percent.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.candidates as f64 * 100.0 / self.total as f64
        }
    }
}

/// Result of a purge pass.
#[derive(Debug, Clone)]
pub struct PurgeReport {
    pub decision: PurgeDecision,
    pub purged: Vec<String>,
    /// Locked or undeletable repositories, retried next cycle.
    pub skipped: Vec<String>,
}

/// Local repositories that are neither listed nor an alias of a listed one.
pub fn purge_candidates(present: &[String], manifest: &Manifest) -> Vec<String> {
    let aliases: BTreeSet<String> = manifest.alias_set();
    present
        .iter()
        .filter(|path| !manifest.contains(path) && !aliases.contains(*path))
        .cloned()
        .collect()
}

/// Deletes `candidates` if the guard allows it.
pub fn run_purge(
    candidates: Vec<String>,
    total: usize,
    threshold: u32,
    force: bool,
    ctx: &PullContext,
) -> PurgeReport {
    let decision = PurgeDecision::evaluate(candidates.len(), total, threshold, force);
    let mut report = PurgeReport {
        decision,
        purged: Vec::new(),
        skipped: Vec::new(),
    };

    if !decision.allowed {
        let refused = Error::PurgeRefused {
            percent: decision.percent(),
            threshold,
        };
        warn!("{}; use --force-purge to override", refused);
        return report;
    }

    for path in candidates {
        let repo = ctx.repo_path(&path);
        let _lock = match ctx.locks.try_lock(&repo) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                info!("{} is locked, not purging it this cycle", path);
                report.skipped.push(path);
                continue;
            }
            Err(e) => {
                warn!("Cannot lock {} for purging: {}", path, e);
                report.skipped.push(path);
                continue;
            }
        };
        match fs::remove_dir_all(&repo) {
            Ok(()) => {
                info!("Purged {}", path);
                report.purged.push(path);
            }
            Err(e) => {
                warn!("Cannot purge {}: {}", path, e);
                report.skipped.push(path);
            }
        }
    }

    report
}
