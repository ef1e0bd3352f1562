//! Shared test utilities for integration and E2E tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = MirrorFixture::new().with_repo("/pub/a.git");
//!     fixture.command().arg("fsck").assert().code(4);
//! }
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_fs::prelude::*;
use filetime::FileTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use repo_mirror::manifest::{Manifest, ManifestEntry};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{entry, git_available, MirrorFixture};
}

/// Returns true when a `git` binary can be run.
#[allow(dead_code)]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// A manifest entry with a fingerprint derived from `tag`.
#[allow(dead_code)]
pub fn entry(tag: &str, modified: i64) -> ManifestEntry {
    ManifestEntry::new(modified).with_fingerprint(format!("{:0>64}", tag))
}

/// A temporary mirror: a top-level directory, an incoming remote manifest
/// and a configuration file pointing at both.
///
/// ```text
/// <tmp>/mirror/            core.toplevel
/// <tmp>/incoming.js.gz     remote.manifest
/// <tmp>/origin/            remote.site
/// <tmp>/repo-mirror.toml   configuration
/// ```
pub struct MirrorFixture {
    temp_dir: assert_fs::TempDir,
    extra_config: String,
}

#[allow(dead_code)]
impl MirrorFixture {
    pub fn new() -> Self {
        let temp_dir = assert_fs::TempDir::new().expect("Failed to create temp directory");
        temp_dir
            .child("mirror")
            .create_dir_all()
            .expect("Failed to create toplevel");
        temp_dir
            .child("origin")
            .create_dir_all()
            .expect("Failed to create origin");
        let fixture = Self {
            temp_dir,
            extra_config: String::new(),
        };
        fixture.write_config();
        fixture
    }

    /// Appends TOML (for example a `[pull]` section) to the configuration.
    pub fn with_config(mut self, extra: &str) -> Self {
        self.extra_config.push_str(extra);
        self.write_config();
        self
    }

    fn write_config(&self) {
        let text = format!(
            "[core]\ntoplevel = {:?}\n\n[remote]\nsite = {:?}\nmanifest = {:?}\n\n{}",
            self.toplevel().display().to_string(),
            self.origin().display().to_string(),
            self.remote_manifest().display().to_string(),
            self.extra_config
        );
        fs::write(self.config_path(), text).expect("Failed to write config file");
    }

    /// Creates a directory that looks like a bare repository in the mirror.
    pub fn with_repo(self, manifest_path: &str) -> Self {
        make_bare_dir(&self.repo_path(manifest_path));
        self
    }

    /// Writes the remote manifest (gzipped) with the given mtime.
    pub fn with_remote_manifest(self, manifest: &Manifest, mtime: i64) -> Self {
        write_gz_manifest(&self.remote_manifest(), manifest, mtime);
        self
    }

    /// Writes the local manifest (gzipped) with the given mtime.
    pub fn with_local_manifest(self, manifest: &Manifest, mtime: i64) -> Self {
        write_gz_manifest(&self.local_manifest(), manifest, mtime);
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn toplevel(&self) -> PathBuf {
        self.path().join("mirror")
    }

    pub fn origin(&self) -> PathBuf {
        self.path().join("origin")
    }

    pub fn repo_path(&self, manifest_path: &str) -> PathBuf {
        self.toplevel().join(manifest_path.trim_start_matches('/'))
    }

    pub fn remote_manifest(&self) -> PathBuf {
        self.path().join("incoming.js.gz")
    }

    pub fn local_manifest(&self) -> PathBuf {
        self.toplevel().join("manifest.js.gz")
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("repo-mirror.toml")
    }

    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// A command for the binary with `--config` pointing at this fixture.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("repo-mirror");
        cmd.current_dir(self.path())
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(self.config_path())
            .arg("--color")
            .arg("never");
        cmd
    }
}

impl Default for MirrorFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn make_bare_dir(repo: &Path) {
    fs::create_dir_all(repo.join("objects")).expect("Failed to create objects dir");
    fs::create_dir_all(repo.join("refs/heads")).expect("Failed to create refs dir");
    fs::write(repo.join("HEAD"), "ref: refs/heads/main\n").expect("Failed to write HEAD");
}

fn write_gz_manifest(path: &Path, manifest: &Manifest, mtime: i64) {
    let json = serde_json::to_vec(manifest).expect("Failed to serialize manifest");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).expect("Failed to compress manifest");
    let bytes = encoder.finish().expect("Failed to finish gzip stream");
    fs::write(path, bytes).expect("Failed to write manifest");
    filetime::set_file_mtime(path, FileTime::from_unix_time(mtime, 0))
        .expect("Failed to set mtime");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_layout() {
        let fixture = MirrorFixture::new().with_repo("/pub/a.git");
        assert!(fixture.toplevel().is_dir());
        assert!(fixture.repo_path("/pub/a.git").join("HEAD").is_file());
        let config = fs::read_to_string(fixture.config_path()).unwrap();
        assert!(config.contains("[remote]"));
    }
}
