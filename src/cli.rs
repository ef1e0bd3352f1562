//! CLI argument parsing, logging setup and command dispatch

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use repo_mirror::config::Config;
use repo_mirror::defaults;
use repo_mirror::output::OutputConfig;

use crate::commands;

/// Repository Mirror - Keep a mirror of many git repositories up to date
#[derive(Parser, Debug)]
#[command(name = "repo-mirror")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, value_name = "FILE", env = "REPO_MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the mirror in line with the remote manifest
    Pull(commands::pull::PullArgs),
    /// Run scheduled repository consistency checks
    Fsck(commands::fsck::FsckArgs),
    /// Regenerate or validate the local manifest
    Manifest(commands::manifest::ManifestArgs),
    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

/// What every command gets to work with.
pub struct AppContext {
    pub config: Config,
    pub output: OutputConfig,
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<ExitCode> {
        let Cli {
            command,
            config,
            color,
            log_level,
        } = self;

        match command {
            Commands::Pull(args) => {
                commands::pull::execute(args, &app_context(config, &color, log_level)?)
            }
            Commands::Fsck(args) => {
                commands::fsck::execute(args, &app_context(config, &color, log_level)?)
            }
            Commands::Manifest(args) => {
                commands::manifest::execute(args, &app_context(config, &color, log_level)?)
            }
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}

/// Loads the configuration and sets up logging and output from it.
fn app_context(
    config_path: Option<PathBuf>,
    color: &str,
    log_level: Option<String>,
) -> Result<AppContext> {
    let config_path = config_path.unwrap_or_else(defaults::default_config_path);
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let level = log_level
        .or_else(|| config.core.loglevel.clone())
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level, config.core.log.as_deref())?;

    Ok(AppContext {
        config,
        output: OutputConfig::from_env_and_flag(color),
    })
}

/// Writes log records to stderr and a log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(level);
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.format_timestamp_secs();

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }

    builder.try_init().context("Cannot initialize logging")?;
    Ok(())
}
