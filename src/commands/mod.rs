//! # CLI Command Implementations
//!
//! Each subcommand of `repo-mirror` lives in its own file with:
//! - an `Args` struct derived with `clap` for its options;
//! - an `execute` function that calls into the `repo_mirror` library and
//!   returns the process exit code.
//!
//! Commands print a short summary on stdout; progress and per-repository
//! detail go through the logger on stderr.

pub mod completions;
pub mod fsck;
pub mod manifest;
pub mod pull;
