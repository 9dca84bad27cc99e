// src/exec/env.rs

//! Working directory and environment overlay applied to spawned processes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::errors::{ExecError, Result};
use crate::types::EnvPriority;

/// Variables to set and to remove on top of the inherited environment.
///
/// The lower-priority set is applied first and the higher-priority set last,
/// so the winner's effect on a key present in both is never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    set: BTreeMap<String, String>,
    unset: BTreeSet<String>,
    priority: EnvPriority,
}

impl EnvOverlay {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: impl Into<String>) {
        self.unset.insert(key.into());
    }

    pub fn set_priority(&mut self, priority: EnvPriority) {
        self.priority = priority;
    }

    pub fn priority(&self) -> EnvPriority {
        self.priority
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    pub fn apply(&self, cmd: &mut Command) {
        match self.priority {
            EnvPriority::Unset => {
                self.apply_set(cmd);
                self.apply_unset(cmd);
            }
            EnvPriority::Set => {
                self.apply_unset(cmd);
                self.apply_set(cmd);
            }
        }
    }

    fn apply_set(&self, cmd: &mut Command) {
        for (key, value) in &self.set {
            cmd.env(key, value);
        }
    }

    fn apply_unset(&self, cmd: &mut Command) {
        for key in &self.unset {
            cmd.env_remove(key);
        }
    }
}

/// Per-runner process configuration.
#[derive(Debug, Clone, Default)]
pub struct ProcessSettings {
    pub working_dir: Option<PathBuf>,
    pub env: EnvOverlay,
    pub redirect_stderr_to_stdout: bool,
}

impl ProcessSettings {
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Build the `Command` for `argv` with the overlay and working directory
    /// applied. Stdout and stderr are always piped.
    ///
    /// On Unix the child leads its own process group, so termination can
    /// reach anything it spawned.
    pub fn build_command(&self, argv: &[String], pipe_stdin: bool) -> Result<Command> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ExecError::ConfigError("command must not be empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        self.env.apply(&mut cmd);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        Ok(cmd)
    }
}

/// Render an argv for logs and errors.
pub fn display_command(argv: &[String]) -> String {
    argv.join(" ")
}
