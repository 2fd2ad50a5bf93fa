//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `ensemble`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ensemble",
    version,
    about = "Drive a batch of tasks through the Ensemble dispatch core.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the engine config file (TOML).
    ///
    /// Default: `Ensemble.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of hello-kernel tasks in the demo batch.
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub tasks: usize,

    /// Give up if the batch has not come back within this many seconds.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub wait: u64,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ENSEMBLE_LOG`, then the config file's `log_level`, then
    /// `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the config, print it, and exit.
    #[arg(long)]
    pub check_config: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
