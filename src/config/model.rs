// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::env::{EnvOverlay, ProcessSettings};
use crate::types::EnvPriority;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [timing]
/// poll_interval_ms = 1000
/// cancel_grace_ms = 5000
/// pump_join_ms = 10000
/// default_timeout_ms = 60000
///
/// [retry]
/// attempts = 3
/// interval_ms = 500
///
/// [env]
/// priority = "unset"
/// working_dir = "/tmp/harness"
/// unset = ["ANDROID_SERIAL"]
///
/// [env.set]
/// LANG = "C"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub timing: TimingSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub env: EnvSection,
}

/// `[timing]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingSection {
    /// Upper bound on one join slice while waiting for an operation.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a cancel waits for output draining before forcing.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// How long a finished process's output pumps get to flush.
    #[serde(default = "default_pump_join_ms")]
    pub pump_join_ms: u64,

    /// Command timeout used when none is given. 0 means no timeout.
    #[serde(default)]
    pub default_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_cancel_grace_ms() -> u64 {
    5000
}

fn default_pump_join_ms() -> u64 {
    10_000
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            pump_join_ms: default_pump_join_ms(),
            default_timeout_ms: 0,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_attempts() -> u32 {
    1
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

/// `[env]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvSection {
    /// `"unset"` (default) or `"set"`: which overlay wins on a shared key.
    #[serde(default)]
    pub priority: EnvPriority,

    #[serde(default)]
    pub set: BTreeMap<String, String>,

    #[serde(default)]
    pub unset: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Validated configuration consumed by
/// [`CommandRunner::from_config`](crate::exec::CommandRunner::from_config).
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub poll_interval: Duration,
    pub cancel_grace: Duration,
    pub pump_join: Duration,
    pub default_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_interval: Duration,
    pub process: ProcessSettings,
}

impl ExecConfig {
    /// Convert without validation. Use `ExecConfig::try_from` for input
    /// that did not come from code.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        let mut env = EnvOverlay::default();
        env.set_priority(raw.env.priority);
        for (key, value) in raw.env.set {
            env.set(key, value);
        }
        for key in raw.env.unset {
            env.unset(key);
        }

        Self {
            poll_interval: Duration::from_millis(raw.timing.poll_interval_ms),
            cancel_grace: Duration::from_millis(raw.timing.cancel_grace_ms),
            pump_join: Duration::from_millis(raw.timing.pump_join_ms),
            default_timeout: Duration::from_millis(raw.timing.default_timeout_ms),
            retry_attempts: raw.retry.attempts,
            retry_interval: Duration::from_millis(raw.retry.interval_ms),
            process: ProcessSettings {
                working_dir: raw.env.working_dir,
                env,
                redirect_stderr_to_stdout: false,
            },
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}
