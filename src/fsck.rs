//! # Check Scheduler
//!
//! Runs `git fsck` over the mirror without checking everything at once.
//! Each repository has a next-check date; a daily run checks the ones that
//! are due and pushes them `frequency` days out. Newly seen repositories
//! get a random first date within the next `frequency` days, so a freshly
//! populated mirror spreads its checks instead of doing them all on one
//! day.
//!
//! After the scheduled pass, an optional time budget is spent on quick
//! checks: repositories that were not checked today, cheapest first by
//! their last measured duration. Quick checks do not move the schedule.
//!
//! Check state lives in a JSON status file keyed by the repository's path
//! on disk:
//!
//! ```json
//! {
//!   "/srv/mirror/pub/a.git": {
//!     "lastcheck": "2024-05-01",
//!     "nextcheck": "2024-05-31",
//!     "s_elapsed": 3.2
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exit_codes::RunStatus;
use crate::filter;
use crate::git::{self, GitOperations};
use crate::lock::LockRegistry;
use crate::manifest::{Manifest, ManifestLock};

/// Check bookkeeping for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckStatusEntry {
    #[serde(with = "last_check")]
    pub lastcheck: Option<Date>,
    #[serde(with = "check_date")]
    pub nextcheck: Date,
    /// Seconds the last check took.
    #[serde(rename = "s_elapsed", default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
}

/// `YYYY-MM-DD`, as stored in the status file.
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

mod check_date {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    use super::DATE_FORMAT;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let text = date.format(DATE_FORMAT).map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let text = String::deserialize(deserializer)?;
        Date::parse(&text, DATE_FORMAT)
            .map_err(|e| D::Error::custom(format!("invalid date {:?}: {}", text, e)))
    }
}

/// Like `check_date`, with `"never"` for a missing date.
mod last_check {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => super::check_date::serialize(date, serializer),
            None => serializer.serialize_str("never"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Date>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        if text == "never" {
            return Ok(None);
        }
        Date::parse(&text, super::DATE_FORMAT)
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid date {:?}: {}", text, e)))
    }
}

/// Contents of the check status file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckStatus {
    entries: BTreeMap<String, CheckStatusEntry>,
}

impl CheckStatus {
    /// Loads the status file; a missing or unreadable file starts afresh.
    pub fn load(path: &Path) -> CheckStatus {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                if path.exists() {
                    warn!("Cannot read {}: {}", path.display(), e);
                }
                return CheckStatus::default();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring corrupt check status {}: {}", path.display(), e);
            CheckStatus::default()
        })
    }

    /// Writes the status file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let mut temp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut temp, &self.entries)?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    pub fn get(&self, repo: &Path) -> Option<&CheckStatusEntry> {
        self.entries.get(&key(repo))
    }

    pub fn insert(&mut self, repo: &Path, entry: CheckStatusEntry) {
        self.entries.insert(key(repo), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key(repo: &Path) -> String {
    repo.to_string_lossy().into_owned()
}

/// Measured result of checking one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub elapsed: Duration,
    /// Non-benign lines reported by the check.
    pub problems: Vec<String>,
}

/// Something that can verify a repository's integrity.
pub trait RepoChecker: Send + Sync {
    fn check(&self, repo: &Path) -> Result<CheckOutcome>;
}

/// Checks repositories with `git fsck --full`, optionally repacking after.
pub struct GitFsck {
    git: Arc<dyn GitOperations>,
    repack: bool,
}

impl GitFsck {
    pub fn new(git: Arc<dyn GitOperations>, repack: bool) -> Self {
        Self { git, repack }
    }
}

impl RepoChecker for GitFsck {
    fn check(&self, repo: &Path) -> Result<CheckOutcome> {
        let started = Instant::now();
        let stderr = self.git.fsck(repo)?;
        let problems = git::noteworthy_lines(&stderr, repo);
        for line in &problems {
            warn!("{}: fsck: {}", repo.display(), line);
        }
        if self.repack {
            if let Err(e) = self.git.repack(repo) {
                warn!("Repacking {} failed: {}", repo.display(), e);
            }
        }
        Ok(CheckOutcome {
            elapsed: started.elapsed(),
            problems,
        })
    }
}

/// What a scheduler run did.
#[derive(Debug, Clone, Default)]
pub struct FsckReport {
    pub scheduled: Vec<PathBuf>,
    pub quick: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    /// Repositories whose check reported problems, with the lines.
    pub problems: Vec<(PathBuf, Vec<String>)>,
    pub added: usize,
    pub removed: usize,
}

impl FsckReport {
    /// True when the status file needs rewriting.
    pub fn changed(&self) -> bool {
        self.added + self.removed + self.scheduled.len() + self.quick.len() > 0
    }

    pub fn status(&self) -> RunStatus {
        if !self.failed.is_empty() || !self.problems.is_empty() {
            RunStatus::CompletedWithFailures
        } else if self.scheduled.is_empty() && self.quick.is_empty() {
            RunStatus::NothingToDo
        } else {
            RunStatus::ChangesApplied
        }
    }
}

/// Decides which repositories to check and when to check them next.
#[derive(Debug, Clone)]
pub struct CheckScheduler {
    pub frequency_days: u32,
    pub quick_budget: Duration,
    /// Check everything now and spread the next checks over the period.
    pub force: bool,
}

impl CheckScheduler {
    fn days(n: u32) -> time::Duration {
        time::Duration::days(i64::from(n))
    }

    fn first_check<R: Rng>(&self, today: Date, rng: &mut R) -> Date {
        let offset = if self.frequency_days >= 2 {
            rng.gen_range(1..self.frequency_days)
        } else {
            1
        };
        today.saturating_add(Self::days(offset))
    }

    fn next_check<R: Rng>(&self, today: Date, rng: &mut R) -> Date {
        let offset = if self.force {
            rng.gen_range(1..=self.frequency_days.max(1))
        } else {
            self.frequency_days
        };
        today.saturating_add(Self::days(offset))
    }

    /// Runs one scheduling cycle over the repositories in `repos`.
    pub fn run<R: Rng>(
        &self,
        status: &mut CheckStatus,
        repos: &[PathBuf],
        today: Date,
        rng: &mut R,
        checker: &dyn RepoChecker,
        locks: &LockRegistry,
    ) -> FsckReport {
        let mut report = FsckReport::default();

        let present: BTreeSet<String> = repos.iter().map(|r| key(r)).collect();
        let before = status.entries.len();
        status.entries.retain(|path, _| present.contains(path));
        report.removed = before - status.entries.len();
        if report.removed > 0 {
            info!("Forgot {} repositories no longer on disk", report.removed);
        }

        for repo in repos {
            if status.get(repo).is_none() {
                let nextcheck = self.first_check(today, rng);
                debug!("{}: first check on {}", repo.display(), nextcheck);
                status.insert(
                    repo,
                    CheckStatusEntry {
                        lastcheck: None,
                        nextcheck,
                        elapsed: None,
                    },
                );
                report.added += 1;
            }
        }

        let due: Vec<PathBuf> = repos
            .iter()
            .filter(|repo| self.force || status.get(repo).is_some_and(|e| e.nextcheck <= today))
            .cloned()
            .collect();
        for repo in due {
            let Some(outcome) = run_check(&repo, checker, locks, &mut report) else {
                continue;
            };
            let nextcheck = self.next_check(today, rng);
            if let Some(entry) = status.entries.get_mut(&key(&repo)) {
                entry.lastcheck = Some(today);
                entry.elapsed = Some(outcome.elapsed.as_secs_f64());
                entry.nextcheck = nextcheck;
            }
            report.scheduled.push(repo);
        }

        self.quick_checks(status, today, checker, locks, &mut report);
        report
    }

    fn quick_checks(
        &self,
        status: &mut CheckStatus,
        today: Date,
        checker: &dyn RepoChecker,
        locks: &LockRegistry,
        report: &mut FsckReport,
    ) {
        if self.quick_budget.is_zero() {
            return;
        }
        let mut remaining = self.quick_budget;
        let mut tried: HashSet<String> = HashSet::new();

        loop {
            let pick = status
                .entries
                .iter()
                .filter(|(path, entry)| entry.lastcheck != Some(today) && !tried.contains(*path))
                .filter_map(|(path, entry)| {
                    let elapsed = Duration::try_from_secs_f64(entry.elapsed?).ok()?;
                    (elapsed <= remaining).then_some((elapsed, path.clone()))
                })
                .min();
            let Some((_, path)) = pick else {
                break;
            };
            tried.insert(path.clone());

            let repo = PathBuf::from(&path);
            debug!("Quick check of {}", path);
            let Some(outcome) = run_check(&repo, checker, locks, report) else {
                continue;
            };
            remaining = remaining.saturating_sub(outcome.elapsed);
            if let Some(entry) = status.entries.get_mut(&path) {
                entry.lastcheck = Some(today);
                entry.elapsed = Some(outcome.elapsed.as_secs_f64());
            }
            report.quick.push(repo);
        }
    }
}

fn run_check(
    repo: &Path,
    checker: &dyn RepoChecker,
    locks: &LockRegistry,
    report: &mut FsckReport,
) -> Option<CheckOutcome> {
    let _lock = match locks.lock(repo) {
        Ok(lock) => lock,
        Err(e) => {
            error!("Cannot lock {}: {}", repo.display(), e);
            report.failed.push(repo.to_path_buf());
            return None;
        }
    };
    info!("Checking {}", repo.display());
    match checker.check(repo) {
        Ok(outcome) => {
            if !outcome.problems.is_empty() {
                report
                    .problems
                    .push((repo.to_path_buf(), outcome.problems.clone()));
            }
            Some(outcome)
        }
        Err(e) => {
            error!("Checking {} failed: {}", repo.display(), e);
            report.failed.push(repo.to_path_buf());
            None
        }
    }
}

/// Repositories listed in the local manifest that exist on disk.
///
/// The manifest is read under its lock so a concurrent pull cannot hand
/// us a half-written file.
pub fn manifest_repositories(config: &Config) -> Result<Vec<PathBuf>> {
    let manifest_path = config.local_manifest();
    let manifest = {
        let _lock = ManifestLock::acquire(&manifest_path)?;
        Manifest::load(&manifest_path)
    };
    let repos = manifest
        .paths()
        .filter(|path| {
            let safe = filter::is_safe_path(path);
            if !safe {
                warn!("Ignoring manifest entry with unsafe path {:?}", path);
            }
            safe
        })
        .map(|path| config.repo_path(path))
        .filter(|repo| {
            let present = git::is_bare_repo(repo);
            if !present {
                debug!("{} is listed but not on disk yet", repo.display());
            }
            present
        })
        .collect();
    Ok(repos)
}

/// Runs a scheduler cycle over the repositories the local manifest lists.
pub fn run_fsck(config: &Config, git: Arc<dyn GitOperations>, force: bool) -> Result<FsckReport> {
    let status_path = config.fsck_status_file();
    let _lock = ManifestLock::acquire(&status_path)?;

    let mut status = CheckStatus::load(&status_path);
    let repos = manifest_repositories(config)?;
    let scheduler = CheckScheduler {
        frequency_days: config.fsck.frequency,
        quick_budget: Duration::from_secs(config.fsck.quick_checks_max_min * 60),
        force,
    };
    let checker = GitFsck::new(git, config.fsck.repack);
    let today = OffsetDateTime::now_utc().date();

    let report = scheduler.run(
        &mut status,
        &repos,
        today,
        &mut rand::thread_rng(),
        &checker,
        &LockRegistry::new(),
    );
    if report.changed() {
        status.save(&status_path)?;
    }
    Ok(report)
}
