//! # Configuration
//!
//! This module defines the TOML configuration file read by every
//! `repo-mirror` command and the logic for loading and validating it.
//!
//! ## Layout
//!
//! ```toml
//! [core]
//! toplevel = "/srv/mirror"
//! manifest = "/srv/mirror/manifest.js.gz"
//!
//! [remote]
//! site = "https://git.example.org"
//! manifest = "/srv/incoming/manifest.js.gz"
//!
//! [pull]
//! pull_threads = 5
//! include = ["*"]
//! exclude = ["/private/*"]
//! purge = true
//! purgeprotect = 5
//!
//! [fsck]
//! frequency = 30
//! ```
//!
//! Every key except `core.toplevel` has a default (see [`crate::defaults`]).
//! Paths left unset are derived from `core.toplevel`.
//!
//! Validation happens once, in [`Config::validate`], so that configuration
//! mistakes abort a run before any repository is touched.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// `[core]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Directory under which every mirrored repository lives.
    pub toplevel: PathBuf,
    /// Local manifest; defaults to `<toplevel>/manifest.js.gz`.
    pub manifest: Option<PathBuf>,
    /// Optional log file, in addition to stderr.
    pub log: Option<PathBuf>,
    /// Log level used when neither `--log-level` nor `RUST_LOG` is given.
    pub loglevel: Option<String>,
}

/// `[remote]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL or directory that repository paths are appended to.
    pub site: String,
    /// Where the upstream manifest has been retrieved to.
    pub manifest: Option<PathBuf>,
}

/// `[pull]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    pub pull_threads: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Ref globs left out of fingerprints.
    pub ignore_refs: Vec<String>,
    /// Delete local repositories that are no longer in the manifest.
    pub purge: bool,
    /// Refuse to purge this percentage of local repositories or more.
    pub purgeprotect: u32,
    pub post_update_hook: Option<PathBuf>,
    /// Pretty-print the local manifest.
    pub pretty: bool,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            pull_threads: defaults::PULL_THREADS,
            include: vec!["*".to_string()],
            exclude: Vec::new(),
            ignore_refs: Vec::new(),
            purge: false,
            purgeprotect: defaults::PURGE_PROTECT_PERCENT,
            post_update_hook: None,
            pretty: false,
        }
    }
}

/// `[fsck]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsckConfig {
    /// Days between scheduled checks of one repository.
    pub frequency: u32,
    /// Check status file; defaults to `<toplevel>/.fsck-status.js`.
    pub statusfile: Option<PathBuf>,
    /// Minutes of opportunistic checking after the scheduled pass.
    pub quick_checks_max_min: u64,
    /// Repack each repository after checking it.
    pub repack: bool,
}

impl Default for FsckConfig {
    fn default() -> Self {
        Self {
            frequency: defaults::FSCK_FREQUENCY_DAYS,
            statusfile: None,
            quick_checks_max_min: 0,
            repack: false,
        }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub remote: RemoteConfig,
    pub pull: PullConfig,
    pub fsck: FsckConfig,
}

/// Parses a configuration from a TOML string without validating it.
pub fn parse(text: &str) -> Result<Config> {
    Ok(toml::from_str(text)?)
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            hint: Some(format!(
                "pass --config or set {}",
                defaults::CONFIG_ENV
            )),
        })?;
        let config = parse(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values and required paths.
    pub fn validate(&self) -> Result<()> {
        if self.core.toplevel.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "core.toplevel is not set".to_string(),
                hint: Some("Add 'toplevel = \"/srv/mirror\"' under [core]".to_string()),
            });
        }
        if !self.core.toplevel.is_dir() {
            return Err(Error::MissingPath {
                what: "top-level directory".to_string(),
                path: self.core.toplevel.clone(),
            });
        }
        if self.pull.pull_threads == 0 {
            return Err(Error::Config {
                message: "pull.pull_threads must be at least 1".to_string(),
                hint: None,
            });
        }
        if self.pull.purgeprotect > 100 {
            return Err(Error::Config {
                message: format!(
                    "pull.purgeprotect must be a percentage, got {}",
                    self.pull.purgeprotect
                ),
                hint: None,
            });
        }
        if self.fsck.frequency == 0 {
            return Err(Error::Config {
                message: "fsck.frequency must be at least 1 day".to_string(),
                hint: None,
            });
        }
        crate::filter::compile(&self.pull.include)?;
        crate::filter::compile(&self.pull.exclude)?;
        crate::filter::compile(&self.pull.ignore_refs)?;
        Ok(())
    }

    pub fn local_manifest(&self) -> PathBuf {
        self.core
            .manifest
            .clone()
            .unwrap_or_else(|| self.core.toplevel.join(defaults::MANIFEST_NAME))
    }

    /// The upstream manifest, required by `pull`.
    pub fn remote_manifest(&self) -> Result<PathBuf> {
        self.remote.manifest.clone().ok_or_else(|| Error::Config {
            message: "remote.manifest is not set".to_string(),
            hint: Some("Point it at the retrieved upstream manifest".to_string()),
        })
    }

    pub fn fsck_status_file(&self) -> PathBuf {
        self.fsck
            .statusfile
            .clone()
            .unwrap_or_else(|| self.core.toplevel.join(defaults::FSCK_STATUS_NAME))
    }

    /// Absolute location of a manifest path on disk.
    pub fn repo_path(&self, manifest_path: &str) -> PathBuf {
        repo_path(&self.core.toplevel, manifest_path)
    }
}

/// Joins a manifest path (`/pub/a.git`) onto a directory.
pub fn repo_path(toplevel: &Path, manifest_path: &str) -> PathBuf {
    toplevel.join(manifest_path.trim_start_matches('/'))
}

/// Builds the clone URL for a manifest path.
///
/// `site` may be a URL (`https://`, `git://`, `ssh://`, `file://`) or a
/// local directory.
pub fn clone_url(site: &str, manifest_path: &str) -> Result<String> {
    let relative = manifest_path.trim_start_matches('/');
    match url::Url::parse(site) {
        Ok(base) => {
            let mut base = base;
            if !base.path().ends_with('/') {
                let path = format!("{}/", base.path());
                base.set_path(&path);
            }
            Ok(base.join(relative)?.to_string())
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Path::new(site)
            .join(relative)
            .to_string_lossy()
            .into_owned()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal(toplevel: &Path) -> String {
        format!("[core]\ntoplevel = {:?}\n", toplevel.display().to_string())
    }

    #[test]
    fn test_parse_defaults() {
        let temp = TempDir::new().unwrap();
        let config = parse(&minimal(temp.path())).unwrap();
        config.validate().unwrap();

        assert_eq!(config.pull.pull_threads, defaults::PULL_THREADS);
        assert_eq!(config.pull.purgeprotect, 5);
        assert_eq!(config.pull.include, vec!["*".to_string()]);
        assert!(!config.pull.purge);
        assert_eq!(config.fsck.frequency, 30);
        assert_eq!(
            config.local_manifest(),
            temp.path().join("manifest.js.gz")
        );
        assert_eq!(
            config.fsck_status_file(),
            temp.path().join(".fsck-status.js")
        );
    }

    #[test]
    fn test_parse_full() {
        let temp = TempDir::new().unwrap();
        let text = format!(
            r#"{}
[remote]
site = "https://git.example.org"
manifest = "/srv/incoming/manifest.js.gz"

[pull]
pull_threads = 2
exclude = ["/private/*"]
ignore_refs = ["refs/meta/*"]
purge = true
purgeprotect = 15
post_update_hook = "/usr/local/bin/hook"

[fsck]
frequency = 7
quick_checks_max_min = 10
"#,
            minimal(temp.path())
        );
        let config = parse(&text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.pull.pull_threads, 2);
        assert!(config.pull.purge);
        assert_eq!(config.pull.purgeprotect, 15);
        assert_eq!(config.fsck.frequency, 7);
        assert_eq!(config.fsck.quick_checks_max_min, 10);
        assert_eq!(
            config.remote_manifest().unwrap(),
            PathBuf::from("/srv/incoming/manifest.js.gz")
        );
    }

    #[test]
    fn test_missing_toplevel_is_config_error() {
        let config = parse("").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_nonexistent_toplevel_is_missing_path() {
        let config = parse("[core]\ntoplevel = \"/definitely/not/here\"\n").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::MissingPath { .. }
        ));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let temp = TempDir::new().unwrap();
        for extra in [
            "[pull]\npull_threads = 0\n",
            "[pull]\npurgeprotect = 101\n",
            "[fsck]\nfrequency = 0\n",
            "[pull]\nexclude = [\"[\"]\n",
        ] {
            let config = parse(&format!("{}{}", minimal(temp.path()), extra)).unwrap();
            assert!(config.validate().is_err(), "accepted {:?}", extra);
        }
    }

    #[test]
    fn test_remote_manifest_required() {
        let temp = TempDir::new().unwrap();
        let config = parse(&minimal(temp.path())).unwrap();
        assert!(config.remote_manifest().is_err());
    }

    #[test]
    fn test_from_file_unreadable() {
        let err = Config::from_file(Path::new("/no/such/config.toml")).unwrap_err();
        assert!(format!("{}", err).contains("hint:"));
    }

    #[test]
    fn test_repo_path_strips_leading_slash() {
        assert_eq!(
            repo_path(Path::new("/srv/mirror"), "/pub/a.git"),
            PathBuf::from("/srv/mirror/pub/a.git")
        );
    }

    #[test]
    fn test_clone_url() {
        assert_eq!(
            clone_url("https://git.example.org", "/pub/a.git").unwrap(),
            "https://git.example.org/pub/a.git"
        );
        assert_eq!(
            clone_url("https://git.example.org/mirror/", "/pub/a.git").unwrap(),
            "https://git.example.org/mirror/pub/a.git"
        );
        assert_eq!(
            clone_url("/srv/origin", "/pub/a.git").unwrap(),
            "/srv/origin/pub/a.git"
        );
    }
}
