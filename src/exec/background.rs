// src/exec/background.rs

//! Fire-and-forget processes handed back to the caller as a live handle.

use std::io::{self, Write};
use std::process::{Child, ExitStatus, Stdio};
use std::time::Duration;

use tracing::{debug, info};
use wait_timeout::ChildExt;

use crate::errors::{ExecError, Result};
use crate::exec::env::{display_command, ProcessSettings};
use crate::exec::process_runner::terminate_group;
use crate::exec::pump::{spawn_pump, SharedSink};

/// A process started by
/// [`CommandRunner::run_cmd_in_background`](crate::exec::CommandRunner::run_cmd_in_background).
///
/// Dropping the handle does not stop the process.
#[derive(Debug)]
pub struct BackgroundProcess {
    child: Child,
    command: String,
}

impl BackgroundProcess {
    /// Spawn `argv`. Stdout and stderr both go to `output`, or are discarded
    /// when it is `None`.
    pub(crate) fn spawn(
        argv: &[String],
        settings: &ProcessSettings,
        output: Option<Box<dyn Write + Send>>,
    ) -> Result<Self> {
        let command = display_command(argv);
        let mut cmd = settings.build_command(argv, false)?;
        if output.is_none() {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: command.clone(),
            source,
        })?;

        if let Some(writer) = output {
            let sink = SharedSink::new(writer);
            if let Some(out) = child.stdout.take() {
                spawn_pump("stdout", out, sink.clone(), || {});
            }
            if let Some(err) = child.stderr.take() {
                spawn_pump("stderr", err, sink, || {});
            }
        }

        info!(pid = child.id(), command = %command, "started background process");
        Ok(Self { child, command })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the process has not exited yet.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }

    /// Wait at most `timeout`; `None` if the process is still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        self.child.wait_timeout(timeout)
    }

    /// Kill the process (and its process group on Unix) and reap it.
    pub fn kill(&mut self) -> io::Result<ExitStatus> {
        terminate_group(self.child.id());
        if let Err(e) = self.child.kill() {
            debug!(pid = self.child.id(), error = %e, "kill failed; process may have exited");
        }
        self.child.wait()
    }
}
