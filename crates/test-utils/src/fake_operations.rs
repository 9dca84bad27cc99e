use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use harness_exec::errors::{ExecError, Result};
use harness_exec::exec::Operation;

/// Fails (returns `Ok(false)`) for the first `failures` runs, then succeeds.
/// Counts runs and cancels.
#[derive(Debug, Default)]
pub struct FlakyOperation {
    failures: usize,
    runs: AtomicUsize,
    cancels: AtomicUsize,
    error_instead: bool,
}

impl FlakyOperation {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Fail with an `Err` instead of `Ok(false)`.
    pub fn erroring(failures: usize) -> Self {
        Self {
            failures,
            error_instead: true,
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self::new(usize::MAX)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Operation for FlakyOperation {
    fn run(&self) -> Result<bool> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if run < self.failures {
            if self.error_instead {
                return Err(ExecError::Other(anyhow::anyhow!("scripted failure {run}")));
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Blocks in `run` until cancelled (or `max_block` passes), then returns
/// `outcome`.
#[derive(Debug)]
pub struct BlockingOperation {
    cancelled: Mutex<bool>,
    changed: Condvar,
    max_block: Duration,
    outcome: bool,
    started: AtomicBool,
    cancels: AtomicUsize,
}

impl BlockingOperation {
    pub fn new(max_block: Duration) -> Self {
        Self::with_outcome(max_block, false)
    }

    pub fn with_outcome(max_block: Duration, outcome: bool) -> Self {
        Self {
            cancelled: Mutex::new(false),
            changed: Condvar::new(),
            max_block,
            outcome,
            started: AtomicBool::new(false),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn shared(max_block: Duration) -> Arc<Self> {
        Arc::new(Self::new(max_block))
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Operation for BlockingOperation {
    fn run(&self) -> Result<bool> {
        self.started.store(true, Ordering::SeqCst);
        let mut guard = self.cancelled.lock().unwrap();
        // Each run blocks afresh.
        *guard = false;
        let _guard = self
            .changed
            .wait_timeout_while(guard, self.max_block, |cancelled| !*cancelled)
            .unwrap();
        Ok(self.outcome)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        *self.cancelled.lock().unwrap() = true;
        self.changed.notify_all();
    }
}

/// Panics in `run`.
#[derive(Debug, Default)]
pub struct PanickingOperation {
    cancels: AtomicUsize,
}

impl PanickingOperation {
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Operation for PanickingOperation {
    fn run(&self) -> Result<bool> {
        panic!("scripted panic");
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
