//! # Git Operations
//!
//! All interaction with repositories on disk goes through the system `git`
//! binary. [`GitOperations`] is the seam: [`SystemGit`] runs real
//! subprocesses, and tests substitute recording mocks so reconciliation
//! logic can be exercised without a git installation.
//!
//! Git is chatty on stderr even when it succeeds. Lines that only report
//! progress or harmless conditions (updated refs, dangling objects) are
//! logged at debug level; anything else is surfaced as a warning.
//!
//! The free functions at the bottom handle the small pieces of repository
//! state that are plain files: the description, the agefile read by web
//! frontends, alias symlinks and object alternates.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Placeholder text written by `git init` into new descriptions.
const DEFAULT_DESCRIPTION_PREFIX: &str = "Unnamed repository";

/// Location of the agefile inside a bare repository.
pub const AGEFILE: &str = "info/web/last-modified";

static BENIGN_STDERR: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^From ",
        r"^Fetching ",
        r"^\s*\*\s+\[new ",
        r"^\s*[-+]?\s*[0-9a-f]+\.\.\.?[0-9a-f]+\s",
        r"^\s*-\s+\[deleted\]",
        r"^\s*\+\s+[0-9a-f]+\.\.\.[0-9a-f]+",
        r"^dangling (commit|blob|tree|tag) ",
        r"^notice:",
        r"^Checking (object directories|connectivity)",
        r"^(remote: )?(Counting|Compressing|Enumerating|Total|Receiving|Resolving)",
        r"^Cloning into ",
        r"^done\.?$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Returns true for stderr lines that carry no actionable information.
pub fn is_benign_line(line: &str) -> bool {
    line.trim().is_empty() || BENIGN_STDERR.iter().any(|re| re.is_match(line))
}

/// Splits stderr into lines worth reporting, logging benign ones at debug.
pub fn noteworthy_lines(stderr: &str, repo: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for line in stderr.lines() {
        if is_benign_line(line) {
            debug!("{}: {}", repo.display(), line.trim_end());
        } else {
            lines.push(line.trim_end().to_string());
        }
    }
    lines
}

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Lists `<sha> <refname>` for every ref in `repo`. A repository with no
    /// refs yields an empty string.
    fn show_ref(&self, repo: &Path) -> Result<String>;

    /// Creates a mirror clone of `url` at `dest`, optionally borrowing
    /// objects from `reference`.
    fn clone_mirror(&self, url: &str, dest: &Path, reference: Option<&Path>) -> Result<()>;

    /// Fetches every remote of `repo`, pruning deleted refs.
    fn fetch(&self, repo: &Path) -> Result<()>;

    /// Runs a full consistency check and returns its stderr.
    fn fsck(&self, repo: &Path) -> Result<String>;

    /// Repacks `repo`, folding borrowed objects into its own store.
    fn repack(&self, repo: &Path) -> Result<()>;

    /// Epoch seconds of the newest commit reachable from any ref.
    fn latest_commit_time(&self, repo: &Path) -> Result<Option<i64>>;

    /// Reads `gitweb.owner` from the repository config.
    fn owner(&self, repo: &Path) -> Result<Option<String>>;

    /// Sets `gitweb.owner` in the repository config.
    fn set_owner(&self, repo: &Path, owner: &str) -> Result<()>;
}

/// [`GitOperations`] backed by the system `git` binary.
#[derive(Debug, Clone, Default)]
pub struct SystemGit;

impl SystemGit {
    fn run(&self, repo: &Path, args: &[&str]) -> Result<Output> {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| Error::GitCommand {
                command: args.join(" "),
                repo: repo.to_path_buf(),
                stderr: e.to_string(),
            })?;
        Ok(output)
    }

    fn run_checked(&self, repo: &Path, args: &[&str]) -> Result<Output> {
        let output = self.run(repo, args)?;
        if !output.status.success() {
            return Err(Error::GitCommand {
                command: args.join(" "),
                repo: repo.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        for line in noteworthy_lines(&String::from_utf8_lossy(&output.stderr), repo) {
            warn!("{}: git {}: {}", repo.display(), args[0], line);
        }
        Ok(output)
    }
}

impl GitOperations for SystemGit {
    fn show_ref(&self, repo: &Path) -> Result<String> {
        let output = self.run(repo, &["show-ref"])?;
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            // show-ref exits 1 when there is nothing to show
            Some(1) if output.stderr.is_empty() => Ok(String::new()),
            _ => Err(Error::GitCommand {
                command: "show-ref".to_string(),
                repo: repo.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn clone_mirror(&self, url: &str, dest: &Path, reference: Option<&Path>) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut cmd = Command::new("git");
        cmd.args(["clone", "--mirror"]);
        if let Some(reference) = reference {
            cmd.arg("--reference").arg(reference);
        }
        let output = cmd
            .arg(url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| Error::GitCommand {
                command: "clone --mirror".to_string(),
                repo: dest.to_path_buf(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::GitCommand {
                command: format!("clone --mirror {}", url),
                repo: dest.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        for line in noteworthy_lines(&String::from_utf8_lossy(&output.stderr), dest) {
            warn!("{}: git clone: {}", dest.display(), line);
        }
        Ok(())
    }

    fn fetch(&self, repo: &Path) -> Result<()> {
        self.run_checked(repo, &["remote", "update", "--prune"])?;
        Ok(())
    }

    fn fsck(&self, repo: &Path) -> Result<String> {
        let output = self.run(repo, &["fsck", "--full"])?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(Error::GitCommand {
                command: "fsck --full".to_string(),
                repo: repo.to_path_buf(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stderr)
    }

    fn repack(&self, repo: &Path) -> Result<()> {
        self.run_checked(repo, &["repack", "-Adlq"])?;
        Ok(())
    }

    fn latest_commit_time(&self, repo: &Path) -> Result<Option<i64>> {
        let output = self.run_checked(
            repo,
            &[
                "for-each-ref",
                "--sort=-committerdate",
                "--count=1",
                "--format=%(committerdate:unix)",
            ],
        )?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim().parse::<i64>().ok())
    }

    fn owner(&self, repo: &Path) -> Result<Option<String>> {
        let output = self.run(repo, &["config", "--get", "gitweb.owner"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let owner = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(owner).filter(|o| !o.is_empty()))
    }

    fn set_owner(&self, repo: &Path, owner: &str) -> Result<()> {
        self.run_checked(repo, &["config", "gitweb.owner", owner])?;
        Ok(())
    }
}

/// Returns true when `path` looks like a bare git repository.
pub fn is_bare_repo(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir()
}

/// Reads the repository description, ignoring git's placeholder text.
pub fn read_description(repo: &Path) -> Option<String> {
    let text = fs::read_to_string(repo.join("description")).ok()?;
    let text = text.trim();
    if text.is_empty() || text.starts_with(DEFAULT_DESCRIPTION_PREFIX) {
        None
    } else {
        Some(text.to_string())
    }
}

/// Writes the repository description if it differs from what is on disk.
pub fn write_description(repo: &Path, description: &str) -> Result<()> {
    if read_description(repo).as_deref() == Some(description) {
        return Ok(());
    }
    fs::write(repo.join("description"), format!("{}\n", description))?;
    Ok(())
}

/// Records `modified` in the agefile used by web frontends.
pub fn write_agefile(repo: &Path, modified: i64) -> Result<()> {
    let when = OffsetDateTime::from_unix_timestamp(modified).map_err(|e| Error::Config {
        message: format!("invalid modification time {}: {}", modified, e),
        hint: None,
    })?;
    let stamp = when.format(&Rfc2822).map_err(|e| Error::Config {
        message: format!("cannot format modification time {}: {}", modified, e),
        hint: None,
    })?;

    let agefile = repo.join(AGEFILE);
    if let Some(parent) = agefile.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(agefile, format!("{}\n", stamp))?;
    Ok(())
}

/// Makes `alias` a symlink to `target`, replacing a stale link.
///
/// A real directory at `alias` is left alone and reported.
pub fn ensure_symlink(target: &Path, alias: &Path) -> Result<()> {
    match fs::symlink_metadata(alias) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(alias)? == target {
                return Ok(());
            }
            fs::remove_file(alias)?;
        }
        Ok(_) => {
            warn!(
                "{} exists and is not a symlink; not aliasing it to {}",
                alias.display(),
                target.display()
            );
            return Ok(());
        }
        Err(_) => {}
    }
    if let Some(parent) = alias.parent() {
        fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(target, alias)?;
    debug!("Linked {} -> {}", alias.display(), target.display());
    Ok(())
}

/// Object directories listed in `objects/info/alternates`.
pub fn read_alternates(repo: &Path) -> Vec<PathBuf> {
    fs::read_to_string(repo.join("objects/info/alternates"))
        .map(|text| {
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}
