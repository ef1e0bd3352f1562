//! # Output Configuration
//!
//! Controls how run summaries look on the terminal: emoji and colour when
//! the terminal supports them, plain bracketed tags otherwise.
//!
//! The following are respected, in this order:
//! - `--color=never|always|auto`
//! - `NO_COLOR` (any value) disables colour
//! - `CLICOLOR=0` disables colour, `CLICOLOR_FORCE=1` forces it
//! - `TERM=dumb` disables colour
//!
//! Summaries go to stdout so that cron mail and service logs capture them
//! separately from the log stream on stderr.

use std::env;

use crate::fsck::FsckReport;
use crate::pull::PullSummary;

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    /// Builds the configuration from the `--color` flag and the environment.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };
        Self { use_color }
    }

    fn detect_color_support() -> bool {
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns `emoji_str` when colour is enabled, `plain` otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

fn count_line(
    config: &OutputConfig,
    icon: &str,
    tag: &str,
    count: usize,
    what: &str,
) -> Option<String> {
    (count > 0).then(|| format!("{} {} {}", emoji(config, icon, tag), count, what))
}

/// Renders the end-of-cycle summary for `pull`.
pub fn pull_summary_lines(config: &OutputConfig, summary: &PullSummary) -> Vec<String> {
    let mut lines: Vec<String> = [
        count_line(config, "🔄", "[UPDATED]", summary.updated, "updated"),
        count_line(config, "📥", "[CLONED]", summary.cloned, "cloned"),
        count_line(config, "✅", "[CURRENT]", summary.already_current, "already current"),
        count_line(config, "📝", "[META]", summary.metadata_refreshed, "metadata refreshed"),
        count_line(config, "➖", "[UNCHANGED]", summary.unchanged, "unchanged"),
        count_line(config, "🗑️", "[PURGED]", summary.purged, "purged"),
        count_line(config, "🔒", "[LOCKED]", summary.lock_busy, "locked, retrying next cycle"),
        count_line(config, "❌", "[FAILED]", summary.failed, "failed"),
        count_line(config, "⛔", "[BLOCKED]", summary.blocked, "blocked by a failed reference"),
        count_line(config, "⏳", "[DEFERRED]", summary.deferred, "deferred"),
        count_line(config, "🔒", "[LOCKED]", summary.purge_skipped, "not purged"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if let Some(percent) = summary.purge_refused {
        lines.push(format!(
            "{} Purge refused: it would remove {:.1}% of local repositories",
            emoji(config, "⚠️", "[WARN]"),
            percent
        ));
    }
    if lines.is_empty() {
        lines.push(format!("{} Mirror is up to date", emoji(config, "✅", "[OK]")));
    }
    lines
}

/// Renders the summary of a check scheduler run.
pub fn fsck_report_lines(config: &OutputConfig, report: &FsckReport) -> Vec<String> {
    let mut lines: Vec<String> = [
        count_line(config, "🔍", "[CHECKED]", report.scheduled.len(), "checked on schedule"),
        count_line(config, "⚡", "[QUICK]", report.quick.len(), "quick checks"),
        count_line(config, "🆕", "[NEW]", report.added, "newly scheduled"),
        count_line(config, "❌", "[FAILED]", report.failed.len(), "could not be checked"),
    ]
    .into_iter()
    .flatten()
    .collect();

    for (repo, problems) in &report.problems {
        lines.push(format!(
            "{} {}: {} problem(s), first: {}",
            emoji(config, "⚠️", "[WARN]"),
            repo.display(),
            problems.len(),
            problems.first().map(String::as_str).unwrap_or_default()
        ));
    }
    if lines.is_empty() {
        lines.push(format!("{} Nothing due", emoji(config, "✅", "[OK]")));
    }
    lines
}
