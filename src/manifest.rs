//! # Manifest Store
//!
//! A manifest maps every mirrored repository path (relative to the shared
//! top-level directory, e.g. `/pub/scm/git/git.git`) to the metadata needed
//! to decide whether a mirror is current: a fingerprint of its refs, the
//! last-modified time, display metadata and its relationships to other
//! repositories.
//!
//! ## Format
//!
//! The document is a JSON object keyed by path, optionally gzip-compressed.
//! Compressed input is detected by its magic bytes; output is compressed when
//! the target file name ends in `.gz`.
//!
//! ## Guarantees
//!
//! - [`Manifest::load`] never fails. A missing or unparseable document loads
//!   as an empty manifest, and an empty manifest is never authoritative:
//!   callers must treat it as "rebuild everything", not "delete everything".
//! - [`Manifest::write`] is all-or-nothing. The document is written to a
//!   temporary file in the target directory and renamed over the target, so
//!   a concurrent reader sees either the old or the new manifest in full.
//! - Before writing, references to paths that are not in the manifest are
//!   cleared.
//! - [`ManifestLock`] serializes read-modify-write cycles on the local
//!   manifest across processes. It is separate from per-repository locks.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use filetime::{set_file_mtime, FileTime};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fs4::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::lock::{lock_path_for, open_lock_file};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Metadata about one mirrored repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestEntry {
    /// Digest of the repository's ref tips. Absent for entries written
    /// before fingerprinting existed.
    pub fingerprint: Option<String>,
    /// Epoch seconds of the last known content change.
    pub modified: i64,
    pub owner: Option<String>,
    pub description: Option<String>,
    /// Path of another entry whose object store this repository borrows.
    pub reference: Option<String>,
    /// Fork network shared by repositories with a common object store.
    pub forkgroup: Option<String>,
    /// Alias paths that resolve to this repository.
    pub symlinks: BTreeSet<String>,
}

impl ManifestEntry {
    pub fn new(modified: i64) -> Self {
        Self {
            modified,
            ..Self::default()
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_forkgroup(mut self, forkgroup: impl Into<String>) -> Self {
        self.forkgroup = Some(forkgroup.into());
        self
    }

    /// True when owner or description differ from `other`.
    pub fn metadata_differs(&self, other: &ManifestEntry) -> bool {
        self.owner != other.owner || self.description != other.description
    }
}

/// Options for [`Manifest::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Indent the JSON document.
    pub pretty: bool,
    /// Stamp the written file's mtime to this epoch instead of "now", so
    /// downstream mirrors can compare manifest freshness by mtime alone.
    pub mtime: Option<i64>,
}

/// Mapping of repository path to [`ManifestEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a manifest, returning an empty one if the document is missing
    /// or cannot be parsed.
    pub fn load(path: &Path) -> Manifest {
        if !path.exists() {
            debug!("No manifest at {}", path.display());
            return Manifest::new();
        }
        match Self::load_strict(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
                Manifest::new()
            }
        }
    }

    /// Loads a manifest, surfacing I/O and parse errors.
    pub fn load_strict(path: &Path) -> Result<Manifest> {
        let mut raw = Vec::new();
        BufReader::new(File::open(path)?).read_to_end(&mut raw)?;

        let manifest = if raw.starts_with(&GZIP_MAGIC) {
            let mut json = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut json)?;
            serde_json::from_slice(&json)?
        } else {
            serde_json::from_slice(&raw)?
        };
        Ok(manifest)
    }

    /// Atomically writes the manifest to `path`.
    ///
    /// Dangling references are cleared first. Replacing a non-empty manifest
    /// with an empty one is refused.
    pub fn write(&mut self, path: &Path, opts: &WriteOptions) -> Result<()> {
        if self.is_empty() && !Manifest::load(path).is_empty() {
            return Err(Error::EmptyManifest {
                path: path.to_path_buf(),
            });
        }
        self.prune_dangling_references();

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let json = if opts.pretty {
            serde_json::to_vec_pretty(self)?
        } else {
            serde_json::to_vec(self)?
        };

        let mut tmp = NamedTempFile::new_in(&parent)?;
        if path.extension().is_some_and(|ext| ext == "gz") {
            let mut encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
            encoder.write_all(&json)?;
            encoder.finish()?;
        } else {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            writer.write_all(&json)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        if let Some(mtime) = opts.mtime {
            set_file_mtime(path, FileTime::from_unix_time(mtime, 0))?;
        }
        debug!("Wrote {} entries to {}", self.len(), path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut ManifestEntry> {
        self.entries.get_mut(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Keeps only the entries for which `keep` returns true.
    ///
    /// References to dropped entries are left in place; they are cleared at
    /// write time.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &ManifestEntry) -> bool) {
        self.entries.retain(|path, entry| keep(path, entry));
    }

    /// Removes an entry, clearing every reference that pointed at it.
    pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
        let removed = self.entries.remove(path)?;
        for (other, entry) in self.entries.iter_mut() {
            if entry.reference.as_deref() == Some(path) {
                debug!("Clearing reference {} -> {}", other, path);
                entry.reference = None;
            }
        }
        Some(removed)
    }

    /// Clears references to paths not present in this manifest. Returns the
    /// number of references cleared.
    pub fn prune_dangling_references(&mut self) -> usize {
        let keys: BTreeSet<String> = self.entries.keys().cloned().collect();
        let mut cleared = 0;
        for (path, entry) in self.entries.iter_mut() {
            if let Some(reference) = &entry.reference {
                if !keys.contains(reference) {
                    warn!("{}: dropping reference to missing {}", path, reference);
                    entry.reference = None;
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// Picks the repository whose objects `path` should borrow.
    ///
    /// Within a fork group any sibling satisfying `exists` will do; the
    /// declared reference is preferred when it is one of them. Without a
    /// fork group the declared reference is used if it satisfies `exists`.
    pub fn effective_reference(&self, path: &str, exists: impl Fn(&str) -> bool) -> Option<String> {
        let entry = self.get(path)?;
        let declared = entry.reference.as_deref();

        if let Some(group) = entry.forkgroup.as_deref() {
            let in_group = |candidate: &str| {
                candidate != path
                    && self
                        .get(candidate)
                        .is_some_and(|e| e.forkgroup.as_deref() == Some(group))
            };
            if let Some(r) = declared.filter(|&r| in_group(r) && exists(r)) {
                return Some(r.to_string());
            }
            if let Some(sibling) = self
                .paths()
                .find(|candidate| in_group(candidate.as_str()) && exists(candidate.as_str()))
            {
                return Some(sibling.clone());
            }
        }

        declared.filter(|&r| exists(r)).map(str::to_string)
    }

    /// Every alias path declared by any entry.
    pub fn alias_set(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .flat_map(|e| e.symlinks.iter().cloned())
            .collect()
    }

    /// The manifest's logical last-modified time.
    pub fn latest_modified(&self) -> Option<i64> {
        self.entries.values().map(|e| e.modified).max()
    }
}

/// Returns a file's mtime as epoch seconds.
pub fn manifest_mtime(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    i64::try_from(secs).ok()
}

/// Exclusive, blocking lock on a manifest for the duration of a
/// read-modify-write cycle.
#[derive(Debug)]
pub struct ManifestLock {
    file: File,
    path: PathBuf,
}

impl ManifestLock {
    pub fn acquire(manifest: &Path) -> Result<Self> {
        let path = lock_path_for(manifest);
        let file = open_lock_file(&path)?;
        file.lock_exclusive()?;
        debug!("Locked manifest {}", manifest.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
