//! # Change Detection
//!
//! A repository's fingerprint is a SHA-256 digest over its ref tips: the
//! `<sha> <refname>` lines printed by `git show-ref`, minus refs matching
//! caller-supplied ignore patterns, sorted so the result does not depend
//! on the order git lists them. Two mirrors with identical refs always
//! produce identical fingerprints, with no reliance on synchronized clocks.
//!
//! Manifests written before fingerprints existed only carry a modification
//! time, so every comparison falls back to `local >= candidate` on
//! timestamps when either side lacks a fingerprint.
//!
//! A repository with no refs has no fingerprint and is never mirrored.

use std::path::Path;
use std::sync::Arc;

use glob::Pattern;
use log::debug;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::git::GitOperations;
use crate::manifest::ManifestEntry;

/// Result of comparing a repository against its recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Unchanged,
    Changed,
    /// Not enough information to decide; callers treat this as changed.
    Unknown,
}

impl ChangeStatus {
    pub fn needs_work(self) -> bool {
        !matches!(self, ChangeStatus::Unchanged)
    }
}

/// What is known about a repository's last-seen state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Fingerprint(String),
    /// Coarse timestamps: the locally recorded one and the candidate's.
    Modified { local: i64, candidate: i64 },
}

/// Computes a fingerprint from `git show-ref` output.
///
/// Returns `None` when no refs remain after applying `ignore`.
pub fn fingerprint_refs(show_ref: &str, ignore: &[Pattern]) -> Option<String> {
    let mut refs: Vec<&str> = show_ref
        .lines()
        .map(str::trim)
        .filter(|line| {
            let Some((_, name)) = line.split_once(char::is_whitespace) else {
                return false;
            };
            let name = name.trim();
            !name.is_empty() && !ignore.iter().any(|p| p.matches(name))
        })
        .collect();

    if refs.is_empty() {
        return None;
    }
    refs.sort_unstable();

    let mut hasher = Sha256::new();
    for line in refs {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Some(hex::encode(hasher.finalize()))
}

/// Compares two manifest entries for the same path.
///
/// `local` is what this mirror last applied; `remote` is the desired state.
pub fn compare_entries(local: Option<&ManifestEntry>, remote: &ManifestEntry) -> ChangeStatus {
    let Some(local) = local else {
        return ChangeStatus::Unknown;
    };
    match (&local.fingerprint, &remote.fingerprint) {
        (Some(ours), Some(theirs)) => {
            if ours == theirs {
                ChangeStatus::Unchanged
            } else {
                ChangeStatus::Changed
            }
        }
        _ => compare_modified(local.modified, remote.modified),
    }
}

fn compare_modified(local: i64, candidate: i64) -> ChangeStatus {
    if local >= candidate {
        ChangeStatus::Unchanged
    } else {
        ChangeStatus::Changed
    }
}

/// Computes fingerprints of repositories on disk.
#[derive(Clone)]
pub struct ChangeDetector {
    git: Arc<dyn GitOperations>,
    ignore_refs: Vec<Pattern>,
}

impl ChangeDetector {
    pub fn new(git: Arc<dyn GitOperations>, ignore_refs: Vec<Pattern>) -> Self {
        Self { git, ignore_refs }
    }

    /// Current fingerprint of `repo`, or `None` if it has no refs.
    pub fn fingerprint(&self, repo: &Path) -> Result<Option<String>> {
        let show_ref = self.git.show_ref(repo)?;
        Ok(fingerprint_refs(&show_ref, &self.ignore_refs))
    }

    /// Decides whether `repo` differs from its recorded state.
    pub fn detect(&self, repo: &Path, recorded: &Recorded) -> ChangeStatus {
        match recorded {
            Recorded::Modified { local, candidate } => compare_modified(*local, *candidate),
            Recorded::Fingerprint(expected) => match self.fingerprint(repo) {
                Ok(Some(current)) if &current == expected => ChangeStatus::Unchanged,
                Ok(Some(_)) => ChangeStatus::Changed,
                Ok(None) => ChangeStatus::Unknown,
                Err(e) => {
                    debug!("Cannot fingerprint {}: {}", repo.display(), e);
                    ChangeStatus::Unknown
                }
            },
        }
    }
}
