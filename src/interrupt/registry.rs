// src/interrupt/registry.rs

//! Shared interruption state and the cancellable wait primitive.
//!
//! A thread is interrupted in two steps:
//!
//! 1. Some other thread calls [`InterruptRegistry::interrupt`], which records
//!    a message for the target thread.
//! 2. The target thread reaches a checkpoint ([`check_interrupted`],
//!    [`sleep`], [`wait_until`]). If it has opted in with
//!    [`allow_interrupt`] (or the force flag is set), the message is removed
//!    and returned as a [`RunInterrupted`] error.
//!
//! All state lives behind one mutex. Waiters block on a single condvar which
//! is notified on every state change, so a thread sleeping at a checkpoint
//! observes an interruption as soon as it becomes deliverable.
//!
//! [`check_interrupted`]: InterruptRegistry::check_interrupted
//! [`sleep`]: InterruptRegistry::sleep
//! [`wait_until`]: InterruptRegistry::wait_until
//! [`allow_interrupt`]: InterruptRegistry::allow_interrupt

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

/// The cancellation signal delivered to an interrupted thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("run interrupted: {message}")]
pub struct RunInterrupted {
    message: String,
}

impl RunInterrupted {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// How a [`InterruptRegistry::wait_until`] call ended, when it did not end
/// with an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The completion predicate became true.
    Done,
    /// The deadline passed first.
    DeadlineReached,
    /// The thread was woken by [`InterruptRegistry::interrupt_thread`] but had
    /// no deliverable message.
    Woken,
}

#[derive(Debug, Default)]
struct RegistryState {
    pending: HashMap<ThreadId, String>,
    allowed: HashSet<ThreadId>,
    woken: HashSet<ThreadId>,
    force_all: bool,
}

impl RegistryState {
    fn is_interruptible(&self, thread: ThreadId) -> bool {
        self.force_all || self.allowed.contains(&thread)
    }

    fn take_deliverable(&mut self, thread: ThreadId) -> Option<RunInterrupted> {
        if !self.is_interruptible(thread) {
            return None;
        }
        let message = self.pending.remove(&thread)?;
        self.woken.remove(&thread);
        Some(RunInterrupted::new(message))
    }
}

/// Process-scoped interruption registry.
///
/// Construct one per isolated context (tests build their own) and share it
/// through an `Arc` with every executor that should observe it.
#[derive(Debug, Default)]
pub struct InterruptRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by the default command runner.
    pub fn process_wide() -> Arc<InterruptRegistry> {
        static PROCESS_WIDE: OnceLock<Arc<InterruptRegistry>> = OnceLock::new();
        Arc::clone(PROCESS_WIDE.get_or_init(|| Arc::new(InterruptRegistry::new())))
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opt the calling thread in or out of interruption.
    ///
    /// Opting out has no effect on delivery once the force flag is set.
    ///
    /// Per-thread state is kept until [`forget_thread`](Self::forget_thread).
    /// A thread that opts in and then exits should call it, or use
    /// [`interruptible_scope`](Self::interruptible_scope) instead.
    pub fn allow_interrupt(&self, allow: bool) {
        let me = thread::current().id();
        let mut state = self.lock();
        if allow {
            state.allowed.insert(me);
        } else {
            state.allowed.remove(&me);
        }
        drop(state);
        // A pending message may have just become deliverable.
        self.changed.notify_all();
    }

    /// Whether an interruption would currently be delivered to the calling
    /// thread.
    pub fn is_interrupt_allowed(&self) -> bool {
        self.lock().is_interruptible(thread::current().id())
    }

    /// Record `message` for `thread`; it is delivered at that thread's next
    /// checkpoint. A newer message replaces an undelivered older one.
    pub fn interrupt(&self, thread: ThreadId, message: impl Into<String>) {
        let message = message.into();
        info!(?thread, %message, "interrupt requested");
        self.lock().pending.insert(thread, message);
        self.changed.notify_all();
    }

    /// Wake `thread` out of any registry wait it is blocked in.
    ///
    /// This does not by itself deliver anything: the woken thread still only
    /// fails with [`RunInterrupted`] if a message is pending and delivery is
    /// allowed. Otherwise its wait returns early with [`WaitOutcome::Woken`].
    pub fn interrupt_thread(&self, thread: ThreadId) {
        debug!(?thread, "waking thread");
        self.lock().woken.insert(thread);
        self.changed.notify_all();
    }

    /// Make every thread interruptible regardless of its own flag. This can
    /// not be undone.
    pub fn force_all_interruptible(&self) {
        let mut state = self.lock();
        if !state.force_all {
            info!("all threads are now interruptible");
            state.force_all = true;
        }
        drop(state);
        self.changed.notify_all();
    }

    pub fn is_force_interruptible(&self) -> bool {
        self.lock().force_all
    }

    /// Whether `thread` has an undelivered message.
    pub fn has_pending(&self, thread: ThreadId) -> bool {
        self.lock().pending.contains_key(&thread)
    }

    /// Checkpoint: fail if an interruption is deliverable to the calling
    /// thread.
    pub fn check_interrupted(&self) -> Result<(), RunInterrupted> {
        let me = thread::current().id();
        match self.lock().take_deliverable(me) {
            Some(signal) => Err(signal),
            None => Ok(()),
        }
    }

    /// Sleep for `duration` unless interrupted first.
    ///
    /// Returns early without error when woken by
    /// [`interrupt_thread`](Self::interrupt_thread) with nothing to deliver.
    /// A duration past the range of `Instant` sleeps until interrupted or
    /// woken.
    pub fn sleep(&self, duration: Duration) -> Result<(), RunInterrupted> {
        self.check_interrupted()?;
        if duration.is_zero() {
            return Ok(());
        }
        let outcome = self.wait_until(Instant::now().checked_add(duration), || false)?;
        if outcome == WaitOutcome::Woken {
            debug!("sleep cut short by thread wakeup");
        }
        self.check_interrupted()
    }

    /// Block the calling thread until `done` returns true, `deadline` passes,
    /// or an interruption becomes deliverable (returned as `Err`).
    ///
    /// `done` is evaluated with the registry lock held; a producer that flips
    /// the predicate must call [`notify_waiters`](Self::notify_waiters)
    /// afterwards. `None` waits without a deadline.
    pub fn wait_until<F>(
        &self,
        deadline: Option<Instant>,
        done: F,
    ) -> Result<WaitOutcome, RunInterrupted>
    where
        F: Fn() -> bool,
    {
        let me = thread::current().id();
        let mut state = self.lock();
        loop {
            if let Some(signal) = state.take_deliverable(me) {
                return Err(signal);
            }
            if done() {
                return Ok(WaitOutcome::Done);
            }
            if state.woken.remove(&me) {
                if !state.is_interruptible(me) {
                    debug!("received a wakeup in uninterruptible mode, ignoring");
                }
                return Ok(WaitOutcome::Woken);
            }
            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(WaitOutcome::DeadlineReached);
                    }
                    self.changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Wake all waiters so they re-evaluate their predicates.
    pub fn notify_waiters(&self) {
        let _state = self.lock();
        self.changed.notify_all();
    }

    /// Drop all per-thread state recorded for `thread`.
    pub fn forget_thread(&self, thread: ThreadId) {
        let mut state = self.lock();
        state.pending.remove(&thread);
        state.allowed.remove(&thread);
        state.woken.remove(&thread);
    }

    /// Opt the calling thread in for the lifetime of the returned guard.
    /// Dropping the guard forgets the thread, including any undelivered
    /// message.
    pub fn interruptible_scope(&self) -> InterruptScope<'_> {
        self.allow_interrupt(true);
        InterruptScope {
            registry: self,
            thread: thread::current().id(),
        }
    }

    /// Number of threads with any recorded state.
    pub fn tracked_threads(&self) -> usize {
        let state = self.lock();
        let mut threads: HashSet<&ThreadId> = state.pending.keys().collect();
        threads.extend(state.allowed.iter());
        threads.extend(state.woken.iter());
        threads.len()
    }
}

/// Guard returned by [`InterruptRegistry::interruptible_scope`].
#[derive(Debug)]
#[must_use = "the thread stops being interruptible when the scope is dropped"]
pub struct InterruptScope<'a> {
    registry: &'a InterruptRegistry,
    thread: ThreadId,
}

impl Drop for InterruptScope<'_> {
    fn drop(&mut self) {
        self.registry.forget_thread(self.thread);
    }
}
