//! # Local Repository Discovery
//!
//! Finds the bare repositories under the top-level directory and builds a
//! manifest describing them. Discovery feeds two consumers: the purge
//! guard, which needs the set of repositories present locally, and the
//! `manifest` command, which publishes this mirror's state for mirrors
//! further downstream.
//!
//! A directory containing `HEAD` and `objects/` is a repository; the walk
//! does not descend into it. Symlinks are not followed, but symlinks that
//! resolve to a discovered repository are reported as its aliases.
//!
//! Repositories without any refs get no fingerprint and are left out of a
//! generated manifest: there is nothing to mirror.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use rayon::prelude::*;
use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::error::Result;
use crate::fingerprint::ChangeDetector;
use crate::git::{self, GitOperations};
use crate::manifest::{Manifest, ManifestEntry};

/// Repositories and aliases found under a top-level directory.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub repos: Vec<PathBuf>,
    /// `(alias, repository)` pairs for symlinks pointing at a repository.
    pub aliases: Vec<(PathBuf, PathBuf)>,
}

/// Walks `toplevel` and collects every bare repository below it.
pub fn find_repositories(toplevel: &Path) -> ScanResult {
    let mut result = ScanResult::default();
    let mut links = Vec::new();

    let mut walker = WalkDir::new(toplevel).follow_links(false).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path under {}: {}", toplevel.display(), e);
                continue;
            }
        };
        if entry.file_type().is_symlink() {
            links.push(entry.into_path());
            continue;
        }
        if entry.depth() > 0 && entry.file_type().is_dir() && git::is_bare_repo(entry.path()) {
            result.repos.push(entry.into_path());
            walker.skip_current_dir();
        }
    }

    if !links.is_empty() {
        let canonical: HashMap<PathBuf, &PathBuf> = result
            .repos
            .iter()
            .filter_map(|repo| Some((fs::canonicalize(repo).ok()?, repo)))
            .collect();
        for link in links {
            let Ok(target) = fs::canonicalize(&link) else {
                debug!("Ignoring dangling symlink {}", link.display());
                continue;
            };
            if let Some(repo) = canonical.get(&target) {
                result.aliases.push((link, (*repo).clone()));
            }
        }
    }

    result.repos.sort();
    result.aliases.sort();
    result
}

/// Converts an on-disk repository path to its manifest key.
pub fn manifest_path(toplevel: &Path, repo: &Path) -> Option<String> {
    let relative = repo.strip_prefix(toplevel).ok()?;
    Some(format!("/{}", relative.to_string_lossy()))
}

/// Builds a manifest describing every repository under `toplevel`.
///
/// Entries whose fingerprint is unchanged since `previous` keep their
/// previous modification time; fork groups are carried over from
/// `previous` since they cannot be read from disk.
pub fn build_manifest(
    toplevel: &Path,
    previous: &Manifest,
    detector: &ChangeDetector,
    git: &Arc<dyn GitOperations>,
) -> Result<Manifest> {
    let scan = find_repositories(toplevel);
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let objects_to_path: BTreeMap<PathBuf, String> = scan
        .repos
        .iter()
        .filter_map(|repo| {
            let key = manifest_path(toplevel, repo)?;
            Some((fs::canonicalize(repo.join("objects")).ok()?, key))
        })
        .collect();

    let entries: Vec<(String, Option<ManifestEntry>)> = scan
        .repos
        .par_iter()
        .filter_map(|repo| {
            let key = manifest_path(toplevel, repo)?;
            let old = previous.get(&key);
            let entry = match detector.fingerprint(repo) {
                Ok(Some(fingerprint)) => {
                    let modified = match old {
                        Some(old) if old.fingerprint.as_deref() == Some(fingerprint.as_str()) => {
                            old.modified
                        }
                        _ => git.latest_commit_time(repo).ok().flatten().unwrap_or(now),
                    };
                    let mut entry = ManifestEntry::new(modified).with_fingerprint(fingerprint);
                    entry.owner = git.owner(repo).ok().flatten();
                    entry.description = git::read_description(repo);
                    entry.forkgroup = old.and_then(|o| o.forkgroup.clone());
                    entry.reference = git::read_alternates(repo)
                        .iter()
                        .filter_map(|alt| fs::canonicalize(alt).ok())
                        .find_map(|alt| objects_to_path.get(&alt).cloned());
                    Some(entry)
                }
                Ok(None) => {
                    debug!("{} has no refs; leaving it out", repo.display());
                    None
                }
                Err(e) => {
                    warn!("Cannot fingerprint {}: {}", repo.display(), e);
                    old.cloned()
                }
            };
            Some((key, entry))
        })
        .collect();

    let mut manifest = Manifest::new();
    for (key, entry) in entries {
        if let Some(entry) = entry {
            manifest.insert(key, entry);
        }
    }

    for (alias, repo) in &scan.aliases {
        let (Some(alias), Some(key)) =
            (manifest_path(toplevel, alias), manifest_path(toplevel, repo))
        else {
            continue;
        };
        if let Some(entry) = manifest.get_mut(&key) {
            entry.symlinks.insert(alias);
        }
    }

    Ok(manifest)
}
