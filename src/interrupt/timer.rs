// src/interrupt/timer.rs

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerPhase {
    Armed,
    Disarmed,
    Fired,
}

/// A one-shot timer that either fires after its delay or is disarmed first.
///
/// The thread hosting the timer blocks in [`wait_to_fire`](Self::wait_to_fire);
/// any other thread may call [`disarm`](Self::disarm). Exactly one of the two
/// wins.
#[derive(Debug)]
pub(crate) struct OneShotTimer {
    phase: Mutex<TimerPhase>,
    changed: Condvar,
}

impl OneShotTimer {
    pub(crate) fn new() -> Self {
        Self {
            phase: Mutex::new(TimerPhase::Armed),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for `delay`. Returns true if the timer fired, false if it was
    /// disarmed before the delay elapsed.
    pub(crate) fn wait_to_fire(&self, delay: Duration) -> bool {
        let guard = self.lock();
        let (mut phase, _) = self
            .changed
            .wait_timeout_while(guard, delay, |p| *p == TimerPhase::Armed)
            .unwrap_or_else(PoisonError::into_inner);
        if *phase == TimerPhase::Armed {
            *phase = TimerPhase::Fired;
            true
        } else {
            false
        }
    }

    /// Returns true if this call disarmed a still-armed timer.
    pub(crate) fn disarm(&self) -> bool {
        let mut phase = self.lock();
        let disarmed = *phase == TimerPhase::Armed;
        if disarmed {
            *phase = TimerPhase::Disarmed;
        }
        drop(phase);
        self.changed.notify_all();
        disarmed
    }

    pub(crate) fn is_armed(&self) -> bool {
        *self.lock() == TimerPhase::Armed
    }

    pub(crate) fn has_fired(&self) -> bool {
        *self.lock() == TimerPhase::Fired
    }
}
