//! # Clone Phase
//!
//! Clones repositories missing from disk once the update pool has drained.
//! Clones run one at a time in the order produced by
//! [`clone_order::resolve`], so a repository is only cloned after the
//! repository whose objects it borrows.
//!
//! A repository whose reference is part of the same batch and failed to
//! clone is reported as blocked rather than cloned without its objects.
//! Once lock contention across the cycle reaches the worker count, the
//! rest of the batch is deferred to the next cycle: another process is
//! evidently busy with the same mirror.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{error, info, warn};

use super::{Outcome, PullContext, TaskOutcome};
use crate::clone_order;
use crate::config;
use crate::git;
use crate::manifest::Manifest;

/// Clones `pending` paths, described by `remote`.
///
/// `prior_lock_failures` is the number of lock-contention failures already
/// seen in this cycle.
pub fn run_clones(
    pending: &[String],
    remote: &Manifest,
    ctx: &PullContext,
    prior_lock_failures: usize,
) -> Vec<TaskOutcome> {
    if pending.is_empty() {
        return Vec::new();
    }

    let order = clone_order::resolve(pending, remote, |path| ctx.exists(path));
    if !order.unresolved.is_empty() {
        warn!(
            "{} repositories have missing or circular references; cloning them last",
            order.unresolved.len()
        );
    }

    let batch: HashSet<&str> = pending.iter().map(String::as_str).collect();
    let mut cloned: HashSet<String> = HashSet::new();
    let mut attempted: HashSet<String> = HashSet::new();
    let mut lock_failures = prior_lock_failures;
    let mut outcomes = Vec::with_capacity(pending.len());

    for path in order.into_sequence() {
        if lock_failures >= ctx.threads {
            outcomes.push(TaskOutcome::new(&path, Outcome::Deferred));
            attempted.insert(path);
            continue;
        }
        let Some(entry) = remote.get(&path) else {
            continue;
        };

        if let Some(reference) = entry.reference.as_deref() {
            if batch.contains(reference)
                && attempted.contains(reference)
                && !cloned.contains(reference)
            {
                warn!("Not cloning {}: its reference {} did not clone", path, reference);
                outcomes.push(TaskOutcome::new(
                    &path,
                    Outcome::Blocked {
                        reference: reference.to_string(),
                    },
                ));
                attempted.insert(path);
                continue;
            }
        }

        let outcome = clone_one(&path, remote, ctx);
        attempted.insert(path.clone());
        match &outcome {
            Outcome::Cloned | Outcome::AlreadyCurrent => {
                cloned.insert(path.clone());
            }
            Outcome::LockBusy => lock_failures += 1,
            _ => {}
        }
        outcomes.push(TaskOutcome::new(path, outcome));
    }

    outcomes
}

fn clone_one(path: &str, remote: &Manifest, ctx: &PullContext) -> Outcome {
    let Some(entry) = remote.get(path) else {
        return Outcome::Deferred;
    };
    let repo = ctx.repo_path(path);

    let _lock = match ctx.locks.try_lock(&repo) {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            info!("{} is locked, will retry next cycle", path);
            return Outcome::LockBusy;
        }
        Err(e) => {
            error!("Cannot lock {}: {}", path, e);
            return Outcome::SyncFailed {
                error: e.to_string(),
            };
        }
    };

    if git::is_bare_repo(&repo) {
        info!("{} appeared while waiting; not cloning it again", path);
        ctx.finish_repo(&repo, entry);
        return Outcome::AlreadyCurrent;
    }

    let reference = remote.effective_reference(path, |p| ctx.exists(p));
    if reference.is_none() && entry.reference.is_some() {
        info!("Cloning {} without a reference repository; repack it later", path);
    }
    let reference_path = reference.as_deref().map(|r| ctx.repo_path(r));

    let url = match config::clone_url(&ctx.site, path) {
        Ok(url) => url,
        Err(e) => {
            error!("Cannot build clone URL for {}: {}", path, e);
            return Outcome::SyncFailed {
                error: e.to_string(),
            };
        }
    };

    let pre_existed = repo.exists();
    if pre_existed && !is_empty_dir(&repo) {
        error!("Not cloning {}: {} exists and is not empty", path, repo.display());
        return Outcome::SyncFailed {
            error: format!("{} exists and is not empty", repo.display()),
        };
    }

    info!("Cloning {}", path);
    if let Err(e) = ctx.git.clone_mirror(&url, &repo, reference_path.as_deref()) {
        error!("Cloning {} failed: {}", path, e);
        if !pre_existed && repo.exists() {
            if let Err(e) = fs::remove_dir_all(&repo) {
                warn!("Cannot remove partial clone {}: {}", repo.display(), e);
            }
        }
        return Outcome::SyncFailed {
            error: e.to_string(),
        };
    }

    ctx.finish_repo(&repo, entry);
    Outcome::Cloned
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::{Error, Result};
    use crate::git::GitOperations;
    use crate::manifest::ManifestEntry;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Mock git that "clones" by creating an empty bare repository
    #[derive(Default)]
    struct CloneGit {
        failing: Vec<String>,
        /// (url, reference) per clone, in call order
        calls: Mutex<Vec<(String, Option<PathBuf>)>>,
    }

    impl GitOperations for CloneGit {
        fn show_ref(&self, _: &Path) -> Result<String> {
            Ok(format!("{} refs/heads/main\n", "a".repeat(40)))
        }
        fn clone_mirror(&self, url: &str, dest: &Path, reference: Option<&Path>) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), reference.map(Path::to_path_buf)));
            fs::create_dir_all(dest.join("objects"))?;
            if self.failing.iter().any(|f| url.ends_with(f.as_str())) {
                return Err(Error::GitCommand {
                    command: "clone --mirror".to_string(),
                    repo: dest.to_path_buf(),
                    stderr: "fatal: early EOF".to_string(),
                });
            }
            fs::write(dest.join("HEAD"), "ref: refs/heads/main\n")?;
            Ok(())
        }
        fn fetch(&self, _: &Path) -> Result<()> {
            unreachable!()
        }
        fn fsck(&self, _: &Path) -> Result<String> {
            unreachable!()
        }
        fn repack(&self, _: &Path) -> Result<()> {
            unreachable!()
        }
        fn latest_commit_time(&self, _: &Path) -> Result<Option<i64>> {
            Ok(None)
        }
        fn owner(&self, _: &Path) -> Result<Option<String>> {
            Ok(None)
        }
        fn set_owner(&self, _: &Path, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn context(git: Arc<CloneGit>, toplevel: &Path, threads: usize) -> PullContext {
        let mut config = Config::default();
        config.core.toplevel = toplevel.to_path_buf();
        config.remote.site = "https://git.example.org".to_string();
        PullContext::new(&config, git, threads).unwrap()
    }

    fn pending(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fork_manifest() -> Manifest {
        let mut remote = Manifest::new();
        remote.insert("/b.git", ManifestEntry::new(1).with_reference("/a.git"));
        remote.insert("/a.git", ManifestEntry::new(1));
        remote
    }

    #[test]
    fn test_reference_is_cloned_first_and_used() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(CloneGit::default());
        let ctx = context(git.clone(), temp.path(), 2);

        let outcomes = run_clones(&pending(&["/b.git", "/a.git"]), &fork_manifest(), &ctx, 0);

        let calls = git.calls.lock().unwrap();
        assert_eq!(calls[0].0, "https://git.example.org/a.git");
        assert_eq!(calls[0].1, None);
        assert_eq!(calls[1].0, "https://git.example.org/b.git");
        assert_eq!(calls[1].1, Some(temp.path().join("a.git")));
        assert!(outcomes.iter().all(|o| o.outcome == Outcome::Cloned));
    }

    #[test]
    fn test_failed_reference_blocks_dependent() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(CloneGit {
            failing: vec!["/a.git".to_string()],
            ..CloneGit::default()
        });
        let ctx = context(git.clone(), temp.path(), 2);

        let outcomes = run_clones(&pending(&["/b.git", "/a.git"]), &fork_manifest(), &ctx, 0);

        assert_eq!(git.calls.lock().unwrap().len(), 1);
        assert!(matches!(outcomes[0].outcome, Outcome::SyncFailed { .. }));
        assert_eq!(
            outcomes[1],
            TaskOutcome::new(
                "/b.git",
                Outcome::Blocked {
                    reference: "/a.git".to_string()
                }
            )
        );
        // The partial clone was cleaned up.
        assert!(!temp.path().join("a.git").exists());
    }

    #[test]
    fn test_existing_reference_outside_batch() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a.git/objects")).unwrap();
        fs::write(temp.path().join("a.git/HEAD"), "ref: refs/heads/main\n").unwrap();
        let git = Arc::new(CloneGit::default());
        let ctx = context(git.clone(), temp.path(), 2);

        run_clones(&pending(&["/b.git"]), &fork_manifest(), &ctx, 0);

        let calls = git.calls.lock().unwrap();
        assert_eq!(calls[0].1, Some(temp.path().join("a.git")));
    }

    #[test]
    fn test_lock_contention_defers_remaining_clones() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(CloneGit::default());
        let ctx = context(git.clone(), temp.path(), 2);

        let outcomes = run_clones(&pending(&["/a.git", "/b.git"]), &fork_manifest(), &ctx, 2);

        assert!(git.calls.lock().unwrap().is_empty());
        assert!(outcomes.iter().all(|o| o.outcome == Outcome::Deferred));
    }

    #[test]
    fn test_busy_lock_skips_clone() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(CloneGit::default());
        let ctx = context(git.clone(), temp.path(), 4);
        let _held = ctx.locks.try_lock(&temp.path().join("a.git")).unwrap().unwrap();

        let outcomes = run_clones(&pending(&["/a.git", "/b.git"]), &fork_manifest(), &ctx, 0);

        assert_eq!(outcomes[0].outcome, Outcome::LockBusy);
        assert!(matches!(outcomes[1].outcome, Outcome::Blocked { .. }));
    }

    #[test]
    fn test_failed_clone_keeps_existing_directory() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("pub")).unwrap();
        let git = Arc::new(CloneGit {
            failing: vec!["/pub".to_string()],
            ..CloneGit::default()
        });
        let ctx = context(git.clone(), temp.path(), 2);
        let mut remote = Manifest::new();
        remote.insert("/pub", ManifestEntry::new(1));

        let outcomes = run_clones(&pending(&["/pub"]), &remote, &ctx, 0);

        assert!(matches!(outcomes[0].outcome, Outcome::SyncFailed { .. }));
        assert_eq!(git.calls.lock().unwrap().len(), 1);
        assert!(temp.path().join("pub").is_dir());
    }

    #[test]
    fn test_refuses_to_clone_into_non_empty_directory() {
        let temp = TempDir::new().unwrap();
        let linux = temp.path().join("pub/linux.git");
        fs::create_dir_all(linux.join("objects")).unwrap();
        fs::write(linux.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        let git = Arc::new(CloneGit::default());
        let ctx = context(git.clone(), temp.path(), 2);
        let mut remote = Manifest::new();
        remote.insert("/pub", ManifestEntry::new(1));

        let outcomes = run_clones(&pending(&["/pub"]), &remote, &ctx, 0);

        assert!(matches!(outcomes[0].outcome, Outcome::SyncFailed { .. }));
        assert!(git.calls.lock().unwrap().is_empty());
        assert!(linux.join("HEAD").is_file());
    }
}
