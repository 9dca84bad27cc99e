// src/exec/timed.rs

//! Timed execution of a cancellable [`Operation`].
//!
//! The operation runs on its own supervising thread. The caller's thread
//! waits for it in slices of at most `poll_interval`, going through the
//! [`InterruptRegistry`] for every slice, so that:
//!
//! - an interruption aimed at the caller is observed promptly even under a
//!   very long (or unbounded) timeout,
//! - the deadline is detected here, not by the operation, which never learns
//!   about the wall-clock budget.
//!
//! Supervising threads are detached: nothing joins them, and they never keep
//! the process alive on exit.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::errors::ExecError;
use crate::exec::operation::Operation;
use crate::interrupt::{DeferredInterruptWatchdog, InterruptRegistry, RunInterrupted, WaitOutcome};
use crate::types::RunStatus;

/// Upper bound on a single join slice.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Status cell shared between the caller and the supervising thread.
///
/// `status` starts out as `TimedOut` and is written exactly once, before
/// `finished` is raised.
#[derive(Debug, Default)]
struct Supervision {
    status: Mutex<RunStatus>,
    finished: AtomicBool,
}

impl Supervision {
    fn finish(&self, status: RunStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
        self.finished.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn status(&self) -> RunStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs operations under a timeout and owns the interruption surface for the
/// threads that call it.
#[derive(Debug)]
pub struct TimedExecutor {
    registry: Arc<InterruptRegistry>,
    poll_interval: Duration,
    watchdog: DeferredInterruptWatchdog,
}

impl TimedExecutor {
    pub fn new(registry: Arc<InterruptRegistry>) -> Self {
        Self {
            watchdog: DeferredInterruptWatchdog::new(Arc::clone(&registry)),
            registry,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Cap each join slice at `poll_interval` (zero is clamped to 1ms).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn registry(&self) -> &Arc<InterruptRegistry> {
        &self.registry
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run `operation` with a `timeout`. `Duration::ZERO`, and any timeout too
    /// large to be represented as an `Instant`, waits forever.
    ///
    /// The returned status is the one recorded by the supervising thread at
    /// the moment waiting stopped, so an operation that finished just after
    /// the last slice still reports its real outcome. When that status is
    /// `TimedOut` or `ExceptionThrown`, the operation is cancelled before
    /// returning.
    ///
    /// An interruption delivered to the calling thread cancels the operation
    /// and is returned as `Err`.
    pub fn run_timed(
        &self,
        timeout: Duration,
        operation: Arc<dyn Operation>,
        log_errors: bool,
    ) -> Result<RunStatus, RunInterrupted> {
        self.registry.check_interrupted()?;

        let supervision = Arc::new(Supervision::default());
        if let Err(e) = self.spawn_supervisor(&operation, &supervision, log_errors) {
            error!(error = %e, "failed to start supervising thread");
            return Ok(RunStatus::ExceptionThrown);
        }

        let deadline = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };
        if let Err(signal) = self.join_in_slices(&supervision, deadline) {
            info!(message = %signal.message(), "interrupted while waiting; cancelling operation");
            operation.cancel();
            return Err(signal);
        }

        let status = supervision.status();
        match status {
            RunStatus::TimedOut => {
                warn!(timeout_ms = timeout.as_millis() as u64, "operation timed out; cancelling");
                operation.cancel();
            }
            RunStatus::ExceptionThrown => {
                debug!("operation failed with an error; cancelling for cleanup");
                operation.cancel();
            }
            RunStatus::Success | RunStatus::Failed => {}
        }

        self.registry.check_interrupted()?;
        Ok(status)
    }

    fn spawn_supervisor(
        &self,
        operation: &Arc<dyn Operation>,
        supervision: &Arc<Supervision>,
        log_errors: bool,
    ) -> std::io::Result<()> {
        let operation = Arc::clone(operation);
        let supervision = Arc::clone(supervision);
        let registry = Arc::clone(&self.registry);

        thread::Builder::new()
            .name("harness-exec-supervisor".to_string())
            .spawn(move || {
                let status = supervise(operation.as_ref(), log_errors);
                supervision.finish(status);
                registry.notify_waiters();
                registry.forget_thread(thread::current().id());
            })
            .map(|_detached| ())
    }

    fn join_in_slices(
        &self,
        supervision: &Supervision,
        deadline: Option<Instant>,
    ) -> Result<(), RunInterrupted> {
        loop {
            let slice_end = match (deadline, Instant::now().checked_add(self.poll_interval)) {
                (Some(d), Some(s)) => Some(d.min(s)),
                (d, s) => d.or(s),
            };

            let outcome = self
                .registry
                .wait_until(slice_end, || supervision.is_finished())?;
            if outcome == WaitOutcome::Done {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(());
            }
        }
    }

    /// Interruptible sleep on the calling thread.
    pub fn sleep(&self, duration: Duration) -> Result<(), RunInterrupted> {
        self.registry.sleep(duration)
    }

    pub fn allow_interrupt(&self, allow: bool) {
        self.registry.allow_interrupt(allow);
    }

    pub fn is_interrupt_allowed(&self) -> bool {
        self.registry.is_interrupt_allowed()
    }

    pub fn interrupt(&self, thread: ThreadId, message: impl Into<String>) {
        self.registry.interrupt(thread, message);
    }

    /// Schedule forced interruptibility for `thread` after `delay`. Returns
    /// false if this executor already has one pending.
    pub fn set_interruptible_in_future(&self, thread: ThreadId, delay: Duration) -> bool {
        self.watchdog.schedule(thread, delay)
    }

    pub fn watchdog(&self) -> &DeferredInterruptWatchdog {
        &self.watchdog
    }
}

/// Body of the supervising thread: run the operation and map its outcome.
fn supervise(operation: &dyn Operation, log_errors: bool) -> RunStatus {
    match panic::catch_unwind(AssertUnwindSafe(|| operation.run())) {
        Ok(Ok(true)) => RunStatus::Success,
        Ok(Ok(false)) => RunStatus::Failed,
        Ok(Err(ExecError::Interrupted(signal))) => {
            if log_errors {
                warn!(message = %signal.message(), "operation interrupted");
            }
            RunStatus::ExceptionThrown
        }
        Ok(Err(err)) => {
            if log_errors {
                error!(error = %err, "operation failed with an error");
            }
            RunStatus::ExceptionThrown
        }
        Err(payload) => {
            if log_errors {
                error!(panic = %panic_message(payload.as_ref()), "operation panicked");
            }
            RunStatus::ExceptionThrown
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
