//! # Exit Codes
//!
//! Process exit codes for the `repo-mirror` binary. Scripts and service
//! managers driving the mirror rely on these to tell a quiet cycle from one
//! that applied changes or one that needs a retry.
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Cycle completed and applied changes |
//! | 1 | Fatal error (configuration, unreadable manifest, I/O) |
//! | 2 | Invalid command-line usage (reported by clap) |
//! | 3 | Completed, but some repositories failed or a purge was refused |
//! | 4 | Nothing to do |

use std::process::ExitCode;

pub const SUCCESS: u8 = 0;
pub const ERROR: u8 = 1;
pub const USAGE: u8 = 2;
pub const PARTIAL: u8 = 3;
pub const NOTHING_TO_DO: u8 = 4;

/// How a cycle ended, independent of how it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NothingToDo,
    ChangesApplied,
    /// Some repositories failed or were skipped; the next cycle retries.
    CompletedWithFailures,
}

impl RunStatus {
    pub fn code(self) -> u8 {
        match self {
            RunStatus::NothingToDo => NOTHING_TO_DO,
            RunStatus::ChangesApplied => SUCCESS,
            RunStatus::CompletedWithFailures => PARTIAL,
        }
    }
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        ExitCode::from(status.code())
    }
}
