// src/cli.rs

//! CLI argument parsing for the demo binary, using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::Limit;

/// Command-line arguments for `subgroup-queue`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "subgroup-queue",
    version,
    about = "Run a synthetic workload through a subgroup queue and check per-key ordering.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `SubGroupQueue.toml` in the current working directory, if it
    /// exists; built-in defaults otherwise.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of distinct subgroup keys.
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub keys: usize,

    /// Operations submitted per key.
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub ops_per_key: usize,

    /// Simulated work per operation, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 25)]
    pub work_ms: u64,

    /// Override `[queue].max_concurrent_operations` (number, "default" or
    /// "unbounded").
    #[arg(long, value_name = "LIMIT")]
    pub max_concurrent: Option<Limit>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SUBGROUP_QUEUE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate config, print the plan, but run nothing.
    #[arg(long)]
    pub dry_run: bool,
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

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
