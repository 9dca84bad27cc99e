// src/exec/operation.rs

//! The unit of work the timed executor supervises.

use std::fmt;
use std::sync::Arc;

use crate::errors::Result;

/// A cancellable unit of work.
///
/// `run` executes on a supervising thread while `cancel` may be called from
/// any other thread at any time, including before `run` starts and after it
/// has returned. Both therefore take `&self`.
///
/// `run` returns `Ok(true)` on success and `Ok(false)` on an expected failure.
/// An `Err` (or a panic) is reported as
/// [`RunStatus::ExceptionThrown`](crate::types::RunStatus::ExceptionThrown).
pub trait Operation: Send + Sync {
    fn run(&self) -> Result<bool>;

    /// Request that an in-flight `run` stop. Must be idempotent.
    fn cancel(&self);
}

/// Adapter turning a closure into an [`Operation`] whose `cancel` is a no-op.
pub struct FnOperation<F> {
    f: F,
}

impl<F> FnOperation<F>
where
    F: Fn() -> Result<bool> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> Arc<dyn Operation> {
        Arc::new(Self::new(f))
    }
}

impl<F> Operation for FnOperation<F>
where
    F: Fn() -> Result<bool> + Send + Sync,
{
    fn run(&self) -> Result<bool> {
        (self.f)()
    }

    fn cancel(&self) {}
}

impl<F> fmt::Debug for FnOperation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperation").finish_non_exhaustive()
    }
}
