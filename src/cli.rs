// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::EnvPriority;

/// Command-line arguments for `harness-exec`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "harness-exec",
    version,
    about = "Run a command under a timeout, with retries and cooperative cancellation.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a config file (TOML).
    ///
    /// Default: `HarnessExec.toml` in the current working directory, if it
    /// exists.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Command timeout in milliseconds (0 = no timeout).
    ///
    /// Overrides `[timing].default_timeout_ms`.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Number of attempts before giving up. Overrides `[retry].attempts`.
    #[arg(long, value_name = "N")]
    pub attempts: Option<u32>,

    /// Pause between attempts in milliseconds. Overrides `[retry].interval_ms`.
    #[arg(long, value_name = "MS")]
    pub retry_interval_ms: Option<u64>,

    /// Text written to the command's stdin.
    #[arg(long, value_name = "TEXT")]
    pub input: Option<String>,

    /// Working directory for the command.
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Set an environment variable for the command (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Remove an environment variable for the command (repeatable).
    #[arg(long = "unset", value_name = "KEY")]
    pub unset: Vec<String>,

    /// Which overlay wins when a variable is both set and unset.
    #[arg(long, value_enum, value_name = "WHICH")]
    pub env_priority: Option<EnvPriorityArg>,

    /// Merge the command's stderr into its stdout.
    #[arg(long)]
    pub redirect_stderr: bool,

    /// After Ctrl-C, how long to wait before forcing the interruption
    /// through.
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    pub shutdown_grace_ms: u64,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `HARNESS_EXEC_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// The command and its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
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

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum EnvPriorityArg {
    Set,
    Unset,
}

impl From<EnvPriorityArg> for EnvPriority {
    fn from(arg: EnvPriorityArg) -> Self {
        match arg {
            EnvPriorityArg::Set => EnvPriority::Set,
            EnvPriorityArg::Unset => EnvPriority::Unset,
        }
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
