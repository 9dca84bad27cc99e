// src/types.rs

//! Value types shared by every layer of the execution engine.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Final outcome of a timed operation.
///
/// The default is `TimedOut`, so a result that was never filled in by a
/// finished run can not be mistaken for a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunStatus {
    Success,
    Failed,
    #[default]
    TimedOut,
    ExceptionThrown,
}

impl RunStatus {
    pub fn is_success(self) -> bool {
        self == RunStatus::Success
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
            RunStatus::ExceptionThrown => "exception_thrown",
        };
        f.write_str(s)
    }
}

/// Captured outcome of a command run.
///
/// `stdout` and `stderr` are always present; they are empty when the output
/// went to a caller-provided sink or nothing was captured before the run was
/// cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    status: RunStatus,
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

impl RunResult {
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Exit code of the process, if it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }

    pub(crate) fn set_output(&mut self, stdout: String, stderr: String) {
        self.stdout = stdout;
        self.stderr = stderr;
    }

    pub(crate) fn set_exit_code(&mut self, code: Option<i32>) {
        self.exit_code = code;
    }
}

/// Which of the two environment overlays wins when both touch the same key.
///
/// - `Unset` (default): a variable listed for removal is absent from the
///   child even if it was also set.
/// - `Set`: an explicitly set variable survives an unset of the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvPriority {
    Set,
    #[default]
    Unset,
}

impl FromStr for EnvPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "set" => Ok(EnvPriority::Set),
            "unset" => Ok(EnvPriority::Unset),
            other => Err(format!(
                "invalid env priority: {other} (expected \"set\" or \"unset\")"
            )),
        }
    }
}
