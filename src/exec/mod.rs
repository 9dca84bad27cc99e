// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`operation`] defines the cancellable [`Operation`] contract.
//! - [`timed`] runs an operation on a supervising thread under a timeout.
//! - [`retry`] layers the retry/backoff policies on top of [`timed`].
//! - [`process_runner`] is the subprocess [`Operation`]: spawn, pump output,
//!   wait, two-phase cancel.
//! - [`pump`] holds the output sinks and pump/stdin threads.
//! - [`env`] builds the `Command` from working directory and env overlay.
//! - [`background`] wraps processes started without waiting.
//! - [`command`] is the caller-facing [`CommandRunner`].

pub mod background;
pub mod command;
pub mod env;
pub mod operation;
pub mod process_runner;
pub mod pump;
pub mod retry;
pub mod timed;

pub use background::BackgroundProcess;
pub use command::CommandRunner;
pub use env::{EnvOverlay, ProcessSettings};
pub use operation::{FnOperation, Operation};
pub use process_runner::{ProcessRunner, RunPhase, RunnerTiming};
pub use pump::CaptureBuffer;
pub use retry::{RetryBudget, RetrySchedule, BACKOFF_GROWTH_FACTOR};
pub use timed::TimedExecutor;
