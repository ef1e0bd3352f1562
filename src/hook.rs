//! Post-update hook execution.
//!
//! After a repository is updated or cloned, an optional hook executable is
//! run with the repository's full path as its only argument (typically to
//! poke a search indexer or a web cache). Hooks are fire-and-report: their
//! stdout is logged at info, stderr at warn, and neither a missing hook nor
//! a failing one stops the cycle.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use log::{info, warn};

/// Runs `hook` for `repo`. Never fails; problems are logged.
pub fn run_hook(hook: &Path, repo: &Path) {
    let executable = hook
        .metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false);
    if !executable {
        warn!(
            "Post-update hook {} is missing or not executable; skipping",
            hook.display()
        );
        return;
    }

    let output = match Command::new(hook).arg(repo).output() {
        Ok(output) => output,
        Err(e) => {
            warn!("Post-update hook {} failed to start: {}", hook.display(), e);
            return;
        }
    };

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        info!("hook {}: {}", repo.display(), line);
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        warn!("hook {}: {}", repo.display(), line);
    }
    if !output.status.success() {
        warn!(
            "Post-update hook {} exited with {} for {}",
            hook.display(),
            output.status,
            repo.display()
        );
    }
}
