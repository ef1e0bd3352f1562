//! # Repository Mirror Library
//!
//! This library keeps a mirror of a large collection of git repositories in
//! step with an upstream source. It is driven by the `repo-mirror`
//! command-line tool, typically from cron or a systemd timer, and is built
//! so that many mirrors can run independently without a coordinator and
//! without assuming any single run completes.
//!
//! ## Quick Example
//!
//! ```
//! use repo_mirror::clone_order;
//! use repo_mirror::manifest::{Manifest, ManifestEntry};
//!
//! let mut manifest = Manifest::new();
//! manifest.insert("/linux.git", ManifestEntry::new(1_700_000_000));
//! manifest.insert(
//!     "/linux-stable.git",
//!     ManifestEntry::new(1_700_000_000).with_reference("/linux.git"),
//! );
//!
//! // Neither repository exists locally yet.
//! let pending = vec!["/linux-stable.git".to_string(), "/linux.git".to_string()];
//! let order = clone_order::resolve(&pending, &manifest, |_| false);
//! assert_eq!(order.into_sequence(), vec!["/linux.git", "/linux-stable.git"]);
//! ```
//!
//! ## Core Concepts
//!
//! - **Manifest (`manifest`)**: the JSON document mapping repository paths
//!   to their fingerprint, modification time and metadata. The upstream
//!   publishes one; each mirror keeps its own record of what it holds.
//! - **Fingerprints (`fingerprint`)**: a digest of a repository's refs used
//!   to decide whether anything changed.
//! - **Locks (`lock`)**: advisory per-repository locks shared with every
//!   other process working on the same mirror.
//! - **Reconciliation (`pull`)**: the update pool, the reference-ordered
//!   clone phase (`clone_order`), the purge guard and the manifest commit.
//! - **Consistency checks (`fsck`)**: a scheduler that spreads `git fsck`
//!   runs over a configurable period.
//! - **Discovery (`scan`)**: finds repositories on disk and generates a
//!   manifest for mirrors further downstream.
//!
//! Git itself is reached through the [`git::GitOperations`] trait, so every
//! component can be exercised against a mock.

pub mod clone_order;
pub mod config;
pub mod defaults;
pub mod error;
pub mod exit_codes;
pub mod filter;
pub mod fingerprint;
pub mod fsck;
pub mod git;
pub mod hook;
pub mod lock;
pub mod manifest;
pub mod output;
pub mod pull;
pub mod scan;
