// src/exec/process_runner.rs

//! A single subprocess run as an [`Operation`].
//!
//! `run` spawns the process, drains stdout/stderr on background pump threads,
//! optionally feeds stdin, waits for exit and then gives the pumps a bounded
//! amount of time to flush.
//!
//! `cancel` escalates in two phases, tracked by [`RunPhase`]:
//!
//! 1. `DestroyRequested`: the run thread terminates the process (its whole
//!    process group on Unix). The canceller waits up to the cancel grace
//!    period for the run to reach `Done`, so captured output survives the
//!    common path.
//! 2. `ForceInterruptRequested`: the run thread abandons whatever it is
//!    waiting on (exit or pump draining) and returns
//!    [`ExecError::ForcedInterrupt`]. The canceller then waits for `Done`
//!    without a bound; every wait on the run thread observes this phase, so
//!    that wait is short.
//!
//! Only the run thread touches the `Child`. Cancellation is a state change
//! plus a condvar notification, which makes a cancel that races with spawn
//! safe: the run thread acts on it as soon as the process exists.

use std::io::Write;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::errors::{ExecError, Result};
use crate::exec::env::{display_command, ProcessSettings};
use crate::exec::operation::Operation;
use crate::exec::pump::{spawn_pump, spawn_stdin_feeder, CaptureBuffer, SharedSink};
use crate::types::{RunResult, RunStatus};

pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_PUMP_JOIN: Duration = Duration::from_secs(10);

/// How often the run thread looks at the cancel state while the process runs.
const EXIT_POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerTiming {
    /// How long `cancel` waits for a destroyed run to finish before forcing.
    pub cancel_grace: Duration,
    /// How long `run` waits for the pumps after the process exits.
    pub pump_join: Duration,
}

impl Default for RunnerTiming {
    fn default() -> Self {
        Self {
            cancel_grace: DEFAULT_CANCEL_GRACE,
            pump_join: DEFAULT_PUMP_JOIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Running,
    DestroyRequested,
    ForceInterruptRequested,
    Done,
}

#[derive(Debug)]
struct ControlState {
    phase: RunPhase,
    cancelled: bool,
    pumps_running: usize,
}

#[derive(Debug)]
struct RunControl {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl RunControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                phase: RunPhase::NotStarted,
                cancelled: false,
                pumps_running: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase(&self) -> RunPhase {
        self.lock().phase
    }

    fn set_phase(&self, phase: RunPhase) {
        self.lock().phase = phase;
        self.changed.notify_all();
    }

    fn pump_started(&self) {
        self.lock().pumps_running += 1;
    }

    fn pump_finished(&self) {
        let mut state = self.lock();
        state.pumps_running = state.pumps_running.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }
}

/// Where one output stream goes.
#[derive(Debug, Clone)]
struct OutputTarget {
    sink: SharedSink,
    capture: Option<CaptureBuffer>,
}

impl OutputTarget {
    fn captured() -> Self {
        let capture = CaptureBuffer::new();
        Self {
            sink: SharedSink::new(Box::new(capture.clone())),
            capture: Some(capture),
        }
    }

    fn external(writer: Box<dyn Write + Send>) -> Self {
        Self {
            sink: SharedSink::new(writer),
            capture: None,
        }
    }

    fn contents(&self) -> String {
        self.capture
            .as_ref()
            .map(CaptureBuffer::contents)
            .unwrap_or_default()
    }
}

/// One command invocation. Runs at most once.
#[derive(Debug)]
pub struct ProcessRunner {
    argv: Vec<String>,
    settings: ProcessSettings,
    input: Option<String>,
    timing: RunnerTiming,
    stdout: OutputTarget,
    stderr: OutputTarget,
    control: Arc<RunControl>,
    result: Mutex<RunResult>,
}

impl ProcessRunner {
    pub fn new(argv: Vec<String>, settings: ProcessSettings) -> Self {
        Self {
            argv,
            settings,
            input: None,
            timing: RunnerTiming::default(),
            stdout: OutputTarget::captured(),
            stderr: OutputTarget::captured(),
            control: Arc::new(RunControl::new()),
            result: Mutex::new(RunResult::default()),
        }
    }

    /// Write `input` to the child's stdin, then close it.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Send output to caller-provided writers instead of capturing it. The
    /// result's stdout/stderr are then empty.
    pub fn with_output(
        mut self,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) -> Self {
        self.stdout = OutputTarget::external(stdout);
        self.stderr = OutputTarget::external(stderr);
        self
    }

    pub fn with_timing(mut self, timing: RunnerTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.control.phase()
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.lock().cancelled
    }

    /// Snapshot of the run's result.
    ///
    /// Output and exit code are filled in by `run`. The status reflects the
    /// process outcome only; a timed caller overrides it with its own verdict.
    pub fn result(&self) -> RunResult {
        self.result_lock().clone()
    }

    fn result_lock(&self) -> MutexGuard<'_, RunResult> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self) -> Result<bool> {
        let command = display_command(&self.argv);
        let mut cmd = self
            .settings
            .build_command(&self.argv, self.input.is_some())?;
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: command.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(pid, command = %command, "process started");

        self.start_pumps(&mut child);
        if let (Some(stdin), Some(input)) = (child.stdin.take(), self.input.clone()) {
            spawn_stdin_feeder(stdin, input);
        }

        let (status, group_signalled) = self.wait_for_exit(&mut child, pid)?;
        let code = status.code();
        self.result_lock().set_exit_code(code);
        debug!(pid, exit_code = ?code, success = status.success(), "process exited");

        self.await_pumps(pid, group_signalled)?;
        Ok(status.success())
    }

    fn start_pumps(&self, child: &mut Child) {
        let stderr_sink = if self.settings.redirect_stderr_to_stdout {
            self.stdout.sink.clone()
        } else {
            self.stderr.sink.clone()
        };

        if let Some(out) = child.stdout.take() {
            self.spawn_tracked_pump("stdout", out, self.stdout.sink.clone());
        }
        if let Some(err) = child.stderr.take() {
            self.spawn_tracked_pump("stderr", err, stderr_sink);
        }
    }

    fn spawn_tracked_pump<R>(&self, label: &'static str, reader: R, sink: SharedSink)
    where
        R: std::io::Read + Send + 'static,
    {
        self.control.pump_started();
        let control = Arc::clone(&self.control);
        if !spawn_pump(label, reader, sink, move || control.pump_finished()) {
            self.control.pump_finished();
        }
    }

    /// Wait for the child to exit, acting on cancel requests meanwhile.
    /// Returns the exit status and whether the process group was already
    /// signalled.
    fn wait_for_exit(&self, child: &mut Child, pid: u32) -> Result<(ExitStatus, bool)> {
        let mut destroyed = false;
        loop {
            match child.wait_timeout(EXIT_POLL_SLICE) {
                Ok(Some(status)) => return Ok((status, destroyed)),
                Ok(None) => {}
                Err(e) => {
                    warn!(pid, error = %e, "failed to wait for process; destroying it");
                    terminate(child);
                    // Best-effort reap.
                    let _ = child.wait_timeout(EXIT_POLL_SLICE);
                    return Err(e.into());
                }
            }
            match self.control.phase() {
                RunPhase::DestroyRequested if !destroyed => {
                    info!(pid, "cancel requested; destroying process");
                    terminate(child);
                    destroyed = true;
                }
                RunPhase::ForceInterruptRequested => {
                    warn!(pid, "forced interrupt while waiting for process exit");
                    terminate(child);
                    // Best-effort reap.
                    let _ = child.wait_timeout(EXIT_POLL_SLICE);
                    return Err(ExecError::ForcedInterrupt);
                }
                _ => {}
            }
        }
    }

    /// Wait for the pumps to drain, bounded by the pump join timeout. A pump
    /// still running at the deadline is logged and left behind.
    ///
    /// The child has been reaped by now, so its pid only still names a process
    /// group while some member of that group is alive. The group is signalled
    /// at most once, and only after checking that it still has members.
    fn await_pumps(&self, pid: u32, mut group_signalled: bool) -> Result<()> {
        let deadline = Instant::now().checked_add(self.timing.pump_join);
        let mut state = self.control.lock();

        loop {
            if state.pumps_running == 0 {
                return Ok(());
            }
            match state.phase {
                RunPhase::ForceInterruptRequested => {
                    warn!(pid, pumps = state.pumps_running, "forced interrupt while draining output");
                    return Err(ExecError::ForcedInterrupt);
                }
                RunPhase::DestroyRequested if !group_signalled => {
                    // The process is gone but something it started may still
                    // hold the pipes open.
                    group_signalled = true;
                    drop(state);
                    if group_alive(pid) {
                        terminate_group(pid);
                    }
                    state = self.control.lock();
                    continue;
                }
                _ => {}
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                warn!(
                    pid,
                    pumps = state.pumps_running,
                    join_ms = self.timing.pump_join.as_millis() as u64,
                    "output pump still running after process exit; continuing without it"
                );
                return Ok(());
            }
            state = match deadline {
                Some(deadline) => {
                    self.control
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .control
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn record_output(&self, status: RunStatus) {
        let stdout = self.stdout.contents();
        let stderr = self.stderr.contents();
        let mut result = self.result_lock();
        result.set_output(stdout, stderr);
        result.set_status(status);
    }
}

impl Operation for ProcessRunner {
    fn run(&self) -> Result<bool> {
        {
            let mut state = self.control.lock();
            if state.phase != RunPhase::NotStarted {
                return Err(ExecError::AlreadyStarted);
            }
            if state.cancelled {
                debug!(command = %display_command(&self.argv), "cancelled before start; not spawning");
                state.phase = RunPhase::Done;
                drop(state);
                self.control.changed.notify_all();
                self.record_output(RunStatus::Failed);
                return Ok(false);
            }
            state.phase = RunPhase::Running;
        }

        let outcome = self.execute();
        let status = match &outcome {
            Ok(true) => RunStatus::Success,
            Ok(false) => RunStatus::Failed,
            Err(_) => RunStatus::ExceptionThrown,
        };
        self.record_output(status);
        self.control.set_phase(RunPhase::Done);
        outcome
    }

    fn cancel(&self) {
        let mut state = self.control.lock();
        state.cancelled = true;
        match state.phase {
            RunPhase::NotStarted => {
                debug!("cancel requested before start");
                return;
            }
            RunPhase::Done => return,
            RunPhase::Running => {
                state.phase = RunPhase::DestroyRequested;
                self.control.changed.notify_all();
            }
            RunPhase::DestroyRequested | RunPhase::ForceInterruptRequested => {}
        }

        let (mut state, _) = self
            .control
            .changed
            .wait_timeout_while(state, self.timing.cancel_grace, |s| {
                s.phase != RunPhase::Done
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.phase != RunPhase::Done {
            if state.phase != RunPhase::ForceInterruptRequested {
                warn!(
                    grace_ms = self.timing.cancel_grace.as_millis() as u64,
                    "run did not finish within cancel grace period; forcing interrupt"
                );
                state.phase = RunPhase::ForceInterruptRequested;
                self.control.changed.notify_all();
            }
            let _done = self
                .control
                .changed
                .wait_while(state, |s| s.phase != RunPhase::Done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Terminate the child and, on Unix, the process group it leads.
fn terminate(child: &mut Child) {
    terminate_group(child.id());
    if let Err(e) = child.kill() {
        debug!(pid = child.id(), error = %e, "failed to kill process");
    }
}

#[cfg(unix)]
pub(crate) fn terminate_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, error = %e, "failed to signal process group");
    }
}

#[cfg(not(unix))]
pub(crate) fn terminate_group(_pid: u32) {}

/// Whether a process group led by `pid` still has members.
#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    matches!(killpg(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn group_alive(_pid: u32) -> bool {
    false
}
