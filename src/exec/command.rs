// src/exec/command.rs

//! Command invocation surface.
//!
//! [`CommandRunner`] combines a [`TimedExecutor`] with the process settings
//! (working directory, environment overlay, stderr redirect) every command it
//! runs inherits. Each command is a fresh [`ProcessRunner`] executed under a
//! timeout:
//!
//! - exit code 0 => `Success`
//! - any other exit => `Failed`
//! - spawn error, I/O error or panic => `ExceptionThrown`
//! - deadline exceeded => `TimedOut` (the process is destroyed)
//!
//! The runner returned by [`CommandRunner::shared`] is a handle on one
//! process-wide instance; its settings can not be changed, so callers
//! sharing it never see each other's configuration.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ExecConfig;
use crate::errors::{ExecError, Result};
use crate::exec::background::BackgroundProcess;
use crate::exec::env::ProcessSettings;
use crate::exec::operation::Operation;
use crate::exec::process_runner::{ProcessRunner, RunnerTiming};
use crate::exec::retry::{RetryBudget, RetrySchedule};
use crate::exec::timed::TimedExecutor;
use crate::interrupt::{InterruptRegistry, RunInterrupted};
use crate::types::{EnvPriority, RunResult, RunStatus};

#[derive(Debug, Clone)]
pub struct CommandRunner {
    settings: ProcessSettings,
    timing: RunnerTiming,
    executor: Arc<TimedExecutor>,
    shared: bool,
}

impl CommandRunner {
    pub fn new(registry: Arc<InterruptRegistry>) -> Self {
        Self {
            settings: ProcessSettings::default(),
            timing: RunnerTiming::default(),
            executor: Arc::new(TimedExecutor::new(registry)),
            shared: false,
        }
    }

    /// Handle on the process-wide default runner. Its configuration is
    /// read-only and every setter fails with [`ExecError::ImmutableRunner`].
    pub fn shared() -> Self {
        static SHARED: OnceLock<CommandRunner> = OnceLock::new();
        SHARED
            .get_or_init(|| {
                let mut runner = CommandRunner::new(InterruptRegistry::process_wide());
                runner.shared = true;
                runner
            })
            .clone()
    }

    /// Build a runner from validated configuration.
    pub fn from_config(config: &ExecConfig, registry: Arc<InterruptRegistry>) -> Self {
        let executor = TimedExecutor::new(registry).with_poll_interval(config.poll_interval);
        Self {
            settings: config.process.clone(),
            timing: RunnerTiming {
                cancel_grace: config.cancel_grace,
                pump_join: config.pump_join,
            },
            executor: Arc::new(executor),
            shared: false,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn executor(&self) -> &TimedExecutor {
        &self.executor
    }

    pub fn registry(&self) -> &Arc<InterruptRegistry> {
        self.executor.registry()
    }

    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    pub fn timing(&self) -> RunnerTiming {
        self.timing
    }

    fn ensure_mutable(&self, field: &'static str) -> Result<()> {
        if self.shared {
            return Err(ExecError::ImmutableRunner(field));
        }
        Ok(())
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) -> Result<&mut Self> {
        self.ensure_mutable("working directory")?;
        self.settings.working_dir = Some(dir.into());
        Ok(self)
    }

    pub fn set_env_variable(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self> {
        self.ensure_mutable("environment")?;
        self.settings.env.set(key, value);
        Ok(self)
    }

    pub fn unset_env_variable(&mut self, key: impl Into<String>) -> Result<&mut Self> {
        self.ensure_mutable("environment")?;
        self.settings.env.unset(key);
        Ok(self)
    }

    pub fn set_env_variable_priority(&mut self, priority: EnvPriority) -> Result<&mut Self> {
        self.ensure_mutable("environment priority")?;
        self.settings.env.set_priority(priority);
        Ok(self)
    }

    pub fn set_redirect_stderr_to_stdout(&mut self, redirect: bool) -> Result<&mut Self> {
        self.ensure_mutable("stderr redirect")?;
        self.settings.redirect_stderr_to_stdout = redirect;
        Ok(self)
    }

    pub fn set_timing(&mut self, timing: RunnerTiming) -> Result<&mut Self> {
        self.ensure_mutable("cancel timing")?;
        self.timing = timing;
        Ok(self)
    }

    fn process(&self, command: &[impl AsRef<str>]) -> ProcessRunner {
        let argv = command.iter().map(|s| s.as_ref().to_string()).collect();
        ProcessRunner::new(argv, self.settings.clone()).with_timing(self.timing)
    }

    fn run_process(
        &self,
        timeout: Duration,
        runner: ProcessRunner,
        log_errors: bool,
    ) -> std::result::Result<RunResult, RunInterrupted> {
        let runner = Arc::new(runner);
        let operation: Arc<dyn Operation> = Arc::clone(&runner) as Arc<dyn Operation>;
        let status = self.executor.run_timed(timeout, operation, log_errors)?;
        let mut result = runner.result();
        result.set_status(status);
        Ok(result)
    }

    /// Run `command` with `timeout`, capturing output in memory.
    pub fn run_timed_cmd(
        &self,
        timeout: Duration,
        command: &[impl AsRef<str>],
    ) -> std::result::Result<RunResult, RunInterrupted> {
        self.run_process(timeout, self.process(command), true)
    }

    /// Like [`run_timed_cmd`](Self::run_timed_cmd) without logging errors.
    pub fn run_timed_cmd_silently(
        &self,
        timeout: Duration,
        command: &[impl AsRef<str>],
    ) -> std::result::Result<RunResult, RunInterrupted> {
        self.run_process(timeout, self.process(command), false)
    }

    /// Run `command`, streaming output to the given writers.
    pub fn run_timed_cmd_with_output(
        &self,
        timeout: Duration,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
        command: &[impl AsRef<str>],
    ) -> std::result::Result<RunResult, RunInterrupted> {
        let runner = self.process(command).with_output(stdout, stderr);
        self.run_process(timeout, runner, true)
    }

    /// Run `command` with `input` written to its stdin.
    pub fn run_timed_cmd_with_input(
        &self,
        timeout: Duration,
        input: &str,
        command: &[impl AsRef<str>],
    ) -> std::result::Result<RunResult, RunInterrupted> {
        let runner = self.process(command).with_input(input);
        self.run_process(timeout, runner, true)
    }

    /// Up to `attempts` runs of `command`, `retry_interval` apart. Returns the
    /// first successful result or the last one.
    pub fn run_timed_cmd_retry(
        &self,
        timeout: Duration,
        retry_interval: Duration,
        attempts: u32,
        command: &[impl AsRef<str>],
    ) -> std::result::Result<RunResult, RunInterrupted> {
        self.retry_cmd(timeout, retry_interval, attempts, command, true)
    }

    pub fn run_timed_cmd_silently_retry(
        &self,
        timeout: Duration,
        retry_interval: Duration,
        attempts: u32,
        command: &[impl AsRef<str>],
    ) -> std::result::Result<RunResult, RunInterrupted> {
        self.retry_cmd(timeout, retry_interval, attempts, command, false)
    }

    fn retry_cmd(
        &self,
        timeout: Duration,
        retry_interval: Duration,
        attempts: u32,
        command: &[impl AsRef<str>],
        log_errors: bool,
    ) -> std::result::Result<RunResult, RunInterrupted> {
        let start = Instant::now();
        let mut schedule = RetrySchedule::new(RetryBudget::Attempts {
            attempts,
            interval: retry_interval,
        });
        let mut last = RunResult::new(RunStatus::TimedOut);

        while schedule.should_attempt(start.elapsed()) {
            last = self.run_process(timeout, self.process(command), log_errors)?;
            if last.status().is_success() {
                return Ok(last);
            }
            match schedule.after_failure(start.elapsed()) {
                Some(pause) => {
                    debug!(
                        attempt = schedule.attempts_made(),
                        status = %last.status(),
                        pause_ms = pause.as_millis() as u64,
                        "command failed; waiting before retry"
                    );
                    self.sleep(pause)?;
                }
                None => break,
            }
        }
        Ok(last)
    }

    /// Start `command` without waiting for it; its output is discarded.
    pub fn run_cmd_in_background(&self, command: &[impl AsRef<str>]) -> Result<BackgroundProcess> {
        let argv: Vec<String> = command.iter().map(|s| s.as_ref().to_string()).collect();
        BackgroundProcess::spawn(&argv, &self.settings, None)
    }

    /// Start `command` without waiting for it, sending stdout and stderr to
    /// `output`.
    pub fn run_cmd_in_background_with_output(
        &self,
        command: &[impl AsRef<str>],
        output: Box<dyn Write + Send>,
    ) -> Result<BackgroundProcess> {
        let argv: Vec<String> = command.iter().map(|s| s.as_ref().to_string()).collect();
        BackgroundProcess::spawn(&argv, &self.settings, Some(output))
    }

    pub fn run_timed(
        &self,
        timeout: Duration,
        operation: Arc<dyn Operation>,
        log_errors: bool,
    ) -> std::result::Result<RunStatus, RunInterrupted> {
        self.executor.run_timed(timeout, operation, log_errors)
    }

    pub fn run_timed_retry(
        &self,
        op_timeout: Duration,
        poll_interval: Duration,
        attempts: u32,
        operation: &Arc<dyn Operation>,
    ) -> std::result::Result<bool, RunInterrupted> {
        self.executor
            .run_timed_retry(op_timeout, poll_interval, attempts, operation)
    }

    pub fn run_fixed_timed_retry(
        &self,
        op_timeout: Duration,
        poll_interval: Duration,
        max_time: Duration,
        operation: &Arc<dyn Operation>,
    ) -> std::result::Result<bool, RunInterrupted> {
        self.executor
            .run_fixed_timed_retry(op_timeout, poll_interval, max_time, operation)
    }

    pub fn run_escalating_timed_retry(
        &self,
        op_timeout: Duration,
        initial_poll_interval: Duration,
        max_poll_interval: Duration,
        max_time: Duration,
        operation: &Arc<dyn Operation>,
    ) -> std::result::Result<bool, RunInterrupted> {
        self.executor.run_escalating_timed_retry(
            op_timeout,
            initial_poll_interval,
            max_poll_interval,
            max_time,
            operation,
        )
    }

    pub fn sleep(&self, duration: Duration) -> std::result::Result<(), RunInterrupted> {
        self.executor.sleep(duration)
    }

    pub fn allow_interrupt(&self, allow: bool) {
        self.executor.allow_interrupt(allow);
    }

    pub fn is_interrupt_allowed(&self) -> bool {
        self.executor.is_interrupt_allowed()
    }

    pub fn interrupt(&self, thread: ThreadId, message: impl Into<String>) {
        self.executor.interrupt(thread, message);
    }

    pub fn set_interruptible_in_future(&self, thread: ThreadId, delay: Duration) -> bool {
        self.executor.set_interruptible_in_future(thread, delay)
    }
}
