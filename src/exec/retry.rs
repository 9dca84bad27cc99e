// src/exec/retry.rs

//! Retry policies layered on [`TimedExecutor::run_timed`].
//!
//! The decision of *whether* and *how long to wait* before another attempt is
//! kept in [`RetrySchedule`], which is pure: it is fed the elapsed time and
//! never reads a clock. The loops here drive it with real time and the
//! registry-aware sleep.
//!
//! Every policy treats `Failed`, `TimedOut` and `ExceptionThrown` alike: only
//! `Success` ends the loop early.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::exec::operation::Operation;
use crate::exec::timed::TimedExecutor;
use crate::interrupt::RunInterrupted;
use crate::types::RunStatus;

/// Escalating backoff multiplies its interval by this after every failure.
pub const BACKOFF_GROWTH_FACTOR: u32 = 4;

/// How long a retry loop may keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    /// Up to `attempts` attempts, `interval` apart.
    Attempts { attempts: u32, interval: Duration },
    /// Start attempts while less than `max_time` has elapsed, `interval`
    /// apart. An attempt started inside the budget runs to completion.
    FixedTime { max_time: Duration, interval: Duration },
    /// Intervals grow by [`BACKOFF_GROWTH_FACTOR`] up to `max_interval`; the
    /// last sleep is shortened to what is left of `max_time`.
    ///
    /// The attempt after that last sleep still gets its full operation
    /// timeout, so a run may end up to one operation timeout past `max_time`.
    Escalating {
        initial_interval: Duration,
        max_interval: Duration,
        max_time: Duration,
    },
}

/// Per-call retry bookkeeping for a [`RetryBudget`].
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    budget: RetryBudget,
    attempts_made: u32,
    next_interval: Duration,
}

impl RetrySchedule {
    pub fn new(budget: RetryBudget) -> Self {
        let next_interval = match budget {
            RetryBudget::Attempts { interval, .. } | RetryBudget::FixedTime { interval, .. } => {
                interval
            }
            RetryBudget::Escalating {
                initial_interval, ..
            } => initial_interval,
        };
        Self {
            budget,
            attempts_made: 0,
            next_interval,
        }
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Whether an attempt may start after `elapsed`.
    pub fn should_attempt(&self, elapsed: Duration) -> bool {
        match self.budget {
            RetryBudget::Attempts { attempts, .. } => self.attempts_made < attempts,
            RetryBudget::FixedTime { max_time, .. } => elapsed < max_time,
            RetryBudget::Escalating { .. } => true,
        }
    }

    /// Record a failed attempt that ended at `elapsed`. Returns the pause
    /// before the next attempt, or `None` if the budget is exhausted.
    pub fn after_failure(&mut self, elapsed: Duration) -> Option<Duration> {
        self.attempts_made += 1;
        match self.budget {
            RetryBudget::Attempts { attempts, interval } => {
                (self.attempts_made < attempts).then_some(interval)
            }
            RetryBudget::FixedTime { max_time, interval } => {
                (elapsed < max_time).then_some(interval)
            }
            RetryBudget::Escalating {
                max_interval,
                max_time,
                ..
            } => {
                let remaining = max_time.checked_sub(elapsed).filter(|r| !r.is_zero())?;
                let pause = self.next_interval.min(remaining);
                self.next_interval = pause
                    .saturating_mul(BACKOFF_GROWTH_FACTOR)
                    .min(max_interval);
                Some(pause)
            }
        }
    }
}

impl TimedExecutor {
    /// Up to `attempts` attempts, sleeping `poll_interval` between them.
    pub fn run_timed_retry(
        &self,
        op_timeout: Duration,
        poll_interval: Duration,
        attempts: u32,
        operation: &Arc<dyn Operation>,
    ) -> Result<bool, RunInterrupted> {
        self.retry_with(
            op_timeout,
            operation,
            RetryBudget::Attempts {
                attempts,
                interval: poll_interval,
            },
        )
    }

    /// Keep attempting until `max_time` has elapsed, sleeping `poll_interval`
    /// between attempts.
    pub fn run_fixed_timed_retry(
        &self,
        op_timeout: Duration,
        poll_interval: Duration,
        max_time: Duration,
        operation: &Arc<dyn Operation>,
    ) -> Result<bool, RunInterrupted> {
        self.retry_with(
            op_timeout,
            operation,
            RetryBudget::FixedTime {
                max_time,
                interval: poll_interval,
            },
        )
    }

    /// Escalating backoff starting at `initial_poll_interval`, capped at
    /// `max_poll_interval`, within `max_time`. See
    /// [`RetryBudget::Escalating`] for the overshoot bound.
    pub fn run_escalating_timed_retry(
        &self,
        op_timeout: Duration,
        initial_poll_interval: Duration,
        max_poll_interval: Duration,
        max_time: Duration,
        operation: &Arc<dyn Operation>,
    ) -> Result<bool, RunInterrupted> {
        self.retry_with(
            op_timeout,
            operation,
            RetryBudget::Escalating {
                initial_interval: initial_poll_interval,
                max_interval: max_poll_interval,
                max_time,
            },
        )
    }

    /// Drive `operation` through a retry loop governed by `budget`.
    pub fn retry_with(
        &self,
        op_timeout: Duration,
        operation: &Arc<dyn Operation>,
        budget: RetryBudget,
    ) -> Result<bool, RunInterrupted> {
        let start = Instant::now();
        let mut schedule = RetrySchedule::new(budget);

        while schedule.should_attempt(start.elapsed()) {
            let status = self.run_timed(op_timeout, Arc::clone(operation), true)?;
            if status == RunStatus::Success {
                return Ok(true);
            }
            match schedule.after_failure(start.elapsed()) {
                Some(pause) => {
                    debug!(
                        attempt = schedule.attempts_made(),
                        %status,
                        pause_ms = pause.as_millis() as u64,
                        "operation failed; waiting before retry"
                    );
                    self.sleep(pause)?;
                }
                None => break,
            }
        }

        debug!(
            attempts = schedule.attempts_made(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "retry budget exhausted without success"
        );
        Ok(false)
    }
}
