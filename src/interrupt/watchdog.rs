// src/interrupt/watchdog.rs

//! Delayed escalation to forced interruptibility.
//!
//! A shutdown handler that asked a thread to stop (via
//! [`InterruptRegistry::interrupt`]) has no guarantee the thread ever opted in
//! to interruption. The watchdog closes that gap: after a delay it sets the
//! registry's force flag and wakes the target thread, so the pending message
//! is delivered at the thread's current checkpoint.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{info, warn};

use crate::interrupt::registry::InterruptRegistry;
use crate::interrupt::timer::OneShotTimer;

/// At most one pending escalation per instance.
#[derive(Debug)]
pub struct DeferredInterruptWatchdog {
    registry: Arc<InterruptRegistry>,
    pending: Mutex<Option<Arc<OneShotTimer>>>,
}

impl DeferredInterruptWatchdog {
    pub fn new(registry: Arc<InterruptRegistry>) -> Self {
        Self {
            registry,
            pending: Mutex::new(None),
        }
    }

    /// Schedule the escalation for `thread` after `delay`.
    ///
    /// Returns false (and logs a warning) if an escalation is already
    /// pending; repeated requests do not stack timers.
    pub fn schedule(&self, thread: ThreadId, delay: Duration) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().is_some_and(|timer| timer.is_armed()) {
            warn!(
                ?thread,
                "interruptible-in-future already scheduled; ignoring new request"
            );
            return false;
        }

        let timer = Arc::new(OneShotTimer::new());
        let registry = Arc::clone(&self.registry);
        let thread_timer = Arc::clone(&timer);

        let spawned = thread::Builder::new()
            .name("harness-exec-watchdog".to_string())
            .spawn(move || {
                if thread_timer.wait_to_fire(delay) {
                    info!(
                        ?thread,
                        delay_ms = delay.as_millis() as u64,
                        "watchdog fired; forcing interruptible mode"
                    );
                    registry.force_all_interruptible();
                    registry.interrupt_thread(thread);
                }
            });

        if let Err(e) = spawned {
            warn!(error = %e, "failed to start watchdog thread");
            return false;
        }

        info!(
            ?thread,
            delay_ms = delay.as_millis() as u64,
            "scheduled forced interruptibility"
        );
        *pending = Some(timer);
        true
    }

    /// Whether an escalation is scheduled and has not fired yet.
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|timer| timer.is_armed())
    }

    /// Whether the most recently scheduled escalation has fired.
    pub fn has_fired(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|timer| timer.has_fired())
    }

    /// Cancel a pending escalation. Returns true if one was cancelled.
    pub fn cancel(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some_and(|timer| timer.disarm())
    }
}
