//! Default values for repo-mirror configuration.
//!
//! This module provides centralized default values used by the
//! configuration loader and the CLI, so both agree on them.

use std::path::PathBuf;

/// Number of parallel update workers.
pub const PULL_THREADS: usize = 5;

/// Purge protection threshold, in percent of local repositories.
pub const PURGE_PROTECT_PERCENT: u32 = 5;

/// Days between full consistency checks of a repository.
pub const FSCK_FREQUENCY_DAYS: u32 = 30;

/// Name of the local manifest inside the top-level directory.
pub const MANIFEST_NAME: &str = "manifest.js.gz";

/// Name of the fsck status file inside the top-level directory.
pub const FSCK_STATUS_NAME: &str = ".fsck-status.js";

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "REPO_MIRROR_CONFIG";

/// Returns the default configuration file path.
///
/// Uses the platform configuration directory (`~/.config/repo-mirror.toml`
/// on Linux), falling back to `repo-mirror.toml` in the current directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("repo-mirror.toml"))
        .unwrap_or_else(|| PathBuf::from("repo-mirror.toml"))
}
