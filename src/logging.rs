// src/logging.rs

//! `tracing` subscriber setup.
//!
//! `--log-level` wins when given. Otherwise `HARNESS_EXEC_LOG` is read as an
//! `EnvFilter` directive list (`debug`, `harness_exec::exec=trace,warn`, ...),
//! falling back to `info` when unset or unparsable. Output goes to stderr;
//! stdout belongs to the command being run.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "HARNESS_EXEC_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env_value.as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

/// The filter `init_logging` would install for this flag and environment
/// value.
pub fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(directive(level));
    }
    match env_value.map(EnvFilter::try_new) {
        Some(Ok(filter)) => filter,
        Some(Err(e)) => {
            // No subscriber yet, so this can only go to stderr directly.
            eprintln!("ignoring invalid {LOG_ENV}: {e}");
            EnvFilter::new(DEFAULT_DIRECTIVES)
        }
        None => EnvFilter::new(DEFAULT_DIRECTIVES),
    }
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
