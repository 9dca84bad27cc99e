// src/lib.rs

pub mod alarm;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod interrupt;
pub mod logging;
pub mod types;

use std::path::Path;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{default_config_path, load_and_validate, ExecConfig};
use crate::exec::CommandRunner;
use crate::interrupt::{InterruptRegistry, RunInterrupted};
use crate::types::{RunResult, RunStatus};

pub use crate::alarm::{Alarm, AlarmHandle};
pub use crate::errors::{ExecError, Result as ExecResult};
pub use crate::exec::{Operation, ProcessRunner, TimedExecutor};
pub use crate::interrupt::DeferredInterruptWatchdog;

/// Exit code reported when the command timed out.
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit code reported when the command could not be run.
pub const EXIT_EXCEPTION: i32 = 125;
/// Exit code reported when the run was interrupted by the operator.
pub const EXIT_INTERRUPTED: i32 = 130;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the command runner, on a blocking worker thread that opts into
///   interruption
/// - Ctrl-C handling: interrupt the worker, then force interruptibility
///   after the shutdown grace period
///
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let registry = Arc::new(InterruptRegistry::new());

    let mut runner = CommandRunner::from_config(&config, Arc::clone(&registry));
    apply_overrides(&mut runner, &args)?;
    let runner = Arc::new(runner);

    let plan = RunPlan::new(&args, &config);
    info!(command = ?plan.command, timeout_ms = plan.timeout.as_millis() as u64, "running command");

    let (ready_tx, ready_rx) = oneshot::channel::<ThreadId>();
    let worker_runner = Arc::clone(&runner);
    let worker = tokio::task::spawn_blocking(move || {
        // Blocking-pool threads outlive the task; the scope clears this
        // thread's registry state when the command is done.
        let scope = worker_runner.registry().interruptible_scope();
        let _ = ready_tx.send(std::thread::current().id());
        let outcome = plan.execute(&worker_runner);
        drop(scope);
        outcome
    });
    let worker_thread = ready_rx
        .await
        .context("command worker exited before starting")?;
    tokio::pin!(worker);

    let finished = tokio::select! {
        joined = &mut worker => Some(joined.context("command worker panicked")?),
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!("Ctrl-C received; interrupting command");
                    runner.interrupt(worker_thread, "interrupted by operator");
                    runner.set_interruptible_in_future(
                        worker_thread,
                        Duration::from_millis(args.shutdown_grace_ms),
                    );
                }
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
            }
            None
        }
    };

    let outcome = match finished {
        Some(outcome) => outcome,
        None => worker.await.context("command worker panicked")?,
    };

    Ok(report(outcome))
}

fn load_config(path: Option<&Path>) -> Result<ExecConfig> {
    match path {
        Some(path) => load_and_validate(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => {
            let default_path = default_config_path();
            if default_path.is_file() {
                debug!(path = %default_path.display(), "using default config file");
                load_and_validate(&default_path)
                    .with_context(|| format!("loading config {}", default_path.display()))
            } else {
                Ok(ExecConfig::default())
            }
        }
    }
}

fn apply_overrides(runner: &mut CommandRunner, args: &CliArgs) -> Result<()> {
    if let Some(dir) = &args.cwd {
        runner.set_working_dir(dir)?;
    }
    for (key, value) in &args.env {
        runner.set_env_variable(key, value)?;
    }
    for key in &args.unset {
        runner.unset_env_variable(key)?;
    }
    if let Some(priority) = args.env_priority {
        runner.set_env_variable_priority(priority.into())?;
    }
    if args.redirect_stderr {
        runner.set_redirect_stderr_to_stdout(true)?;
    }
    Ok(())
}

/// What the worker thread runs.
#[derive(Debug, Clone)]
struct RunPlan {
    command: Vec<String>,
    timeout: Duration,
    attempts: u32,
    retry_interval: Duration,
    input: Option<String>,
}

impl RunPlan {
    fn new(args: &CliArgs, config: &ExecConfig) -> Self {
        let attempts = args.attempts.unwrap_or(config.retry_attempts).max(1);
        if attempts > 1 && args.input.is_some() {
            warn!(attempts, "--input runs the command once; ignoring retry attempts");
        }
        Self {
            command: args.command.clone(),
            timeout: args
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(config.default_timeout),
            attempts,
            retry_interval: args
                .retry_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(config.retry_interval),
            input: args.input.clone(),
        }
    }

    fn execute(&self, runner: &CommandRunner) -> std::result::Result<RunResult, RunInterrupted> {
        match &self.input {
            Some(input) => runner.run_timed_cmd_with_input(self.timeout, input, &self.command),
            None if self.attempts > 1 => runner.run_timed_cmd_retry(
                self.timeout,
                self.retry_interval,
                self.attempts,
                &self.command,
            ),
            None => runner.run_timed_cmd(self.timeout, &self.command),
        }
    }
}

/// Forward captured output and map the outcome to an exit code.
fn report(outcome: std::result::Result<RunResult, RunInterrupted>) -> i32 {
    let result = match outcome {
        Ok(result) => result,
        Err(signal) => {
            warn!(message = %signal.message(), "command interrupted");
            return EXIT_INTERRUPTED;
        }
    };

    print!("{}", result.stdout());
    eprint!("{}", result.stderr());

    let code = exit_code_for(&result);
    info!(status = %result.status(), exit_code = code, "command finished");
    code
}

/// Exit code for a finished run: the child's own code when it exited,
/// otherwise a fixed code per status.
pub fn exit_code_for(result: &RunResult) -> i32 {
    match result.status() {
        RunStatus::Success => 0,
        RunStatus::Failed => result.exit_code().filter(|c| *c != 0).unwrap_or(1),
        RunStatus::TimedOut => EXIT_TIMED_OUT,
        RunStatus::ExceptionThrown => EXIT_EXCEPTION,
    }
}
