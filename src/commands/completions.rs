//! # Completions Command Implementation
//!
//! Generates shell completion scripts with `clap_complete`. The script is
//! written to stdout; redirect it to wherever your shell looks for them:
//!
//! ```bash
//! repo-mirror completions bash > ~/.local/share/bash-completion/completions/repo-mirror
//! repo-mirror completions zsh > ~/.zfunc/_repo-mirror
//! ```
//!
//! This is the only command that runs without a configuration file.

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, CommandFactory, ValueEnum};
use clap_complete::{generate, Shell};

use crate::cli::Cli;

/// Shell types for completion generation
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

/// Generate shell completion scripts
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: CompletionShell,
}

/// Execute the `completions` command.
pub fn execute(args: CompletionsArgs) -> Result<ExitCode> {
    let mut cmd = Cli::command();
    generate(Shell::from(args.shell), &mut cmd, "repo-mirror", &mut io::stdout());
    Ok(ExitCode::SUCCESS)
}
