//! # Error Handling
//!
//! This module defines the centralized error type for the `repo-mirror`
//! library. It uses `thiserror` to describe every failure that can abort an
//! operation, with enough context (paths, commands, stderr) to act on the
//! message without re-running in debug mode.
//!
//! Per-repository problems during a reconciliation cycle (lock contention,
//! a failed fetch, a blocked clone) are *not* errors at this level. They are
//! recorded as outcomes and folded into the run summary, so one bad
//! repository never aborts the batch. The variants here are for the cases
//! that must stop the run or that a single operation reports to its caller:
//!
//! - Configuration problems and missing required paths.
//! - An empty or unreadable manifest where an authoritative one is required.
//! - Failed git subprocesses.
//! - Refused purges.
//! - I/O, JSON, TOML and glob errors wrapped from their crates.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for repo-mirror operations
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration file is invalid or contains out-of-range values.
    #[error("Configuration error: {message}{}", format_hint(hint))]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A path the configuration requires does not exist or is unusable.
    #[error("Missing {what}: {}", path.display())]
    MissingPath { what: String, path: PathBuf },

    /// A manifest that must be authoritative turned out to be empty or
    /// unreadable.
    #[error(
        "Manifest {} is empty or unreadable; refusing to treat it as authoritative",
        path.display()
    )]
    EmptyManifest { path: PathBuf },

    /// A git subprocess failed.
    #[error("Git command failed in {}: git {command} - {stderr}", repo.display())]
    GitCommand {
        command: String,
        repo: PathBuf,
        stderr: String,
    },

    /// Another process holds the lock on this path.
    #[error("Lock busy: {}", path.display())]
    LockBusy { path: PathBuf },

    /// The purge guard refused to delete repositories.
    #[error("Refusing to purge {percent:.1}% of local repositories (threshold {threshold}%)")]
    PurgeRefused { percent: f64, threshold: u32 },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML parsing error, wrapped from `toml::de::Error`.
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The worker pool could not be started.
    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

fn format_hint(hint: &Option<String>) -> String {
    hint.as_ref()
        .map(|h| format!("\n  hint: {}", h))
        .unwrap_or_default()
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
