// src/interrupt/mod.rs

//! Cooperative cross-thread interruption.
//!
//! - [`registry`] owns the shared interruption state: pending messages per
//!   thread, the per-thread "interruption allowed" flag and the process-wide
//!   force flag. Every blocking wait in the engine goes through it so that a
//!   pending interruption wakes the waiter instead of being polled.
//! - [`watchdog`] schedules the one-way escalation that makes every thread
//!   interruptible after a delay.
//! - [`timer`] is the small disarmable one-shot timer both the watchdog and
//!   [`crate::alarm`] are built on.

pub mod registry;
pub(crate) mod timer;
pub mod watchdog;

pub use registry::{InterruptRegistry, InterruptScope, RunInterrupted, WaitOutcome};
pub use watchdog::DeferredInterruptWatchdog;
