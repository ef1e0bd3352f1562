//! # Advisory Repository Locks
//!
//! Every repository operation that touches a mirror on disk (update, clone,
//! purge, fsck) runs under an exclusive advisory lock on a file that sits
//! next to the repository: `/srv/mirror/pub/a.git` is guarded by
//! `/srv/mirror/pub/.a.git.lock`. Keeping the lock file outside the
//! repository lets a clone lock a path that does not exist yet and lets a
//! purge keep holding the lock while the directory is removed.
//!
//! Locks are advisory (`flock` through `fs4`) and only coordinate processes
//! that follow the same convention. Update, clone and purge paths use
//! [`LockRegistry::try_lock`] and skip the repository on contention; the
//! consistency checker uses [`LockRegistry::lock`] and waits.
//!
//! The registry maps each lock path to the open lock file. A [`RepoLock`]
//! guard removes its entry when dropped, which closes the file and releases
//! the lock, so early returns and unwinding workers can never leak a lock.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs4::FileExt;
use log::debug;

use crate::error::{Error, Result};

/// Returns the lock file path guarding `repo`.
pub fn lock_path_for(repo: &Path) -> PathBuf {
    let name = repo
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());
    let parent = repo.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{}.lock", name))
}

/// Opens (creating if needed) a lock file and its parent directory.
pub(crate) fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

/// Process-wide registry of held repository locks.
///
/// Cloning the registry is cheap and shares the same set of held locks, so
/// a single registry can be handed to every worker in a pool.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    held: Arc<Mutex<HashMap<PathBuf, File>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<PathBuf, File>> {
        // A worker that panicked while holding the map cannot leave it in a
        // half-updated state: every mutation is a single insert or remove.
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tries to take the lock for `repo` without waiting.
    ///
    /// Returns `Ok(None)` when another process, or another worker in this
    /// process, already holds it.
    pub fn try_lock(&self, repo: &Path) -> Result<Option<RepoLock>> {
        let lock_path = lock_path_for(repo);
        if self.held().contains_key(&lock_path) {
            debug!("{} is already locked by this process", repo.display());
            return Ok(None);
        }

        let file = open_lock_file(&lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(self.register(repo, lock_path, file))),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                debug!("{} is locked by another process", repo.display());
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Takes the lock for `repo`, waiting for any other process holding it.
    ///
    /// Fails with [`Error::LockBusy`] if this process already holds it;
    /// waiting would never end.
    pub fn lock(&self, repo: &Path) -> Result<RepoLock> {
        let lock_path = lock_path_for(repo);
        if self.held().contains_key(&lock_path) {
            return Err(Error::LockBusy {
                path: repo.to_path_buf(),
            });
        }
        let file = open_lock_file(&lock_path)?;
        file.lock_exclusive()?;
        Ok(self.register(repo, lock_path, file))
    }

    /// Returns true when this process currently holds the lock for `repo`.
    pub fn is_held(&self, repo: &Path) -> bool {
        self.held().contains_key(&lock_path_for(repo))
    }

    fn register(&self, repo: &Path, lock_path: PathBuf, file: File) -> RepoLock {
        debug!("Locked {}", repo.display());
        self.held().insert(lock_path.clone(), file);
        RepoLock {
            registry: self.clone(),
            lock_path,
            repo: repo.to_path_buf(),
        }
    }
}

/// Scoped exclusive lock on one repository. Released on drop.
#[derive(Debug)]
pub struct RepoLock {
    registry: LockRegistry,
    lock_path: PathBuf,
    repo: PathBuf,
}

impl RepoLock {
    pub fn repo(&self) -> &Path {
        &self.repo
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Some(file) = self.registry.held().remove(&self.lock_path) {
            let _ = file.unlock();
        }
        debug!("Unlocked {}", self.repo.display());
    }
}
