#![allow(dead_code)]

pub use harness_exec_test_utils::{eventually, init_tracing};

use std::sync::Arc;
use std::time::Duration;

use harness_exec::exec::{CommandRunner, TimedExecutor};
use harness_exec::interrupt::InterruptRegistry;

/// `sh -c <script>` as an argv.
pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

/// Executor on a private registry with a short poll interval.
pub fn executor() -> TimedExecutor {
    TimedExecutor::new(Arc::new(InterruptRegistry::new()))
        .with_poll_interval(Duration::from_millis(20))
}

/// Runner on a private registry.
pub fn runner() -> CommandRunner {
    CommandRunner::new(Arc::new(InterruptRegistry::new()))
}
