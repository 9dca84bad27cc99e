mod common;

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use harness_exec::errors::Result as ExecResult;
use harness_exec::exec::{FnOperation, Operation};
use harness_exec::types::RunStatus;
use harness_exec_test_utils::fake_operations::{
    BlockingOperation, FlakyOperation, PanickingOperation,
};

use common::{eventually, executor, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn successful_operation_reports_success() -> TestResult {
    init_tracing();
    let exec = executor();

    let status = exec.run_timed(
        Duration::from_secs(5),
        FnOperation::shared(|| Ok(true)),
        true,
    )?;

    assert_eq!(status, RunStatus::Success);
    Ok(())
}

#[test]
fn operation_returning_false_reports_failed_without_cancel() -> TestResult {
    init_tracing();
    let exec = executor();
    let op = Arc::new(FlakyOperation::always_failing());

    let status = exec.run_timed(Duration::from_secs(5), op.clone(), true)?;

    assert_eq!(status, RunStatus::Failed);
    assert_eq!(op.runs(), 1);
    assert_eq!(op.cancels(), 0);
    Ok(())
}

#[test]
fn operation_error_maps_to_exception_and_cancels() -> TestResult {
    init_tracing();
    let exec = executor();
    let op = Arc::new(FlakyOperation::erroring(1));

    let status = exec.run_timed(Duration::from_secs(5), op.clone(), false)?;

    assert_eq!(status, RunStatus::ExceptionThrown);
    assert_eq!(op.cancels(), 1);
    Ok(())
}

#[test]
fn panicking_operation_maps_to_exception() -> TestResult {
    init_tracing();
    let exec = executor();
    let op = Arc::new(PanickingOperation::default());

    let status = exec.run_timed(Duration::from_secs(5), op.clone(), true)?;

    assert_eq!(status, RunStatus::ExceptionThrown);
    assert_eq!(op.cancels(), 1);
    Ok(())
}

#[test]
fn slow_operation_times_out_and_is_cancelled() -> TestResult {
    init_tracing();
    let exec = executor();
    let op = Arc::new(BlockingOperation::new(Duration::from_secs(30)));

    let started = Instant::now();
    let status = exec.run_timed(Duration::from_millis(150), op.clone(), true)?;

    assert_eq!(status, RunStatus::TimedOut);
    assert!(op.was_started());
    assert_eq!(op.cancels(), 1);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[test]
fn deadline_is_honoured_with_a_long_poll_interval() -> TestResult {
    init_tracing();
    let exec = executor().with_poll_interval(Duration::from_secs(60));
    let op = Arc::new(BlockingOperation::new(Duration::from_secs(30)));

    let started = Instant::now();
    let status = exec.run_timed(Duration::from_millis(100), op, true)?;

    assert_eq!(status, RunStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[test]
fn zero_timeout_waits_for_completion() -> TestResult {
    init_tracing();
    let exec = executor();
    let op = Arc::new(BlockingOperation::with_outcome(
        Duration::from_millis(300),
        true,
    ));

    let status = exec.run_timed(Duration::ZERO, op.clone(), true)?;

    assert_eq!(status, RunStatus::Success);
    assert_eq!(op.cancels(), 0);
    Ok(())
}

#[test]
fn interrupt_aimed_at_waiting_caller_cancels_operation() -> TestResult {
    init_tracing();
    let exec = Arc::new(executor());
    let op = Arc::new(BlockingOperation::new(Duration::from_secs(30)));

    let worker = {
        let exec = Arc::clone(&exec);
        let op: Arc<dyn Operation> = op.clone();
        thread::spawn(move || {
            exec.allow_interrupt(true);
            exec.run_timed(Duration::ZERO, op, true)
        })
    };

    assert!(eventually(Duration::from_secs(5), || op.was_started()));
    exec.interrupt(worker.thread().id(), "stop now");

    let outcome = worker.join().expect("worker panicked");
    let signal = outcome.expect_err("run should have been interrupted");
    assert_eq!(signal.message(), "stop now");
    assert_eq!(op.cancels(), 1);
    Ok(())
}

#[test]
fn interrupt_is_held_while_caller_has_not_opted_in() -> TestResult {
    init_tracing();
    let exec = Arc::new(executor());
    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();

    let worker = {
        let exec = Arc::clone(&exec);
        thread::spawn(move || {
            ready_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            let op = Arc::new(BlockingOperation::with_outcome(
                Duration::from_millis(200),
                true,
            ));
            let status = exec.run_timed(Duration::from_secs(5), op, true);
            exec.allow_interrupt(true);
            let delivered = exec.registry().check_interrupted();
            (status, delivered)
        })
    };

    ready_rx.recv()?;
    exec.interrupt(worker.thread().id(), "later");
    go_tx.send(())?;

    let (status, delivered) = worker.join().expect("worker panicked");
    assert_eq!(status, Ok(RunStatus::Success));
    assert_eq!(delivered.unwrap_err().message(), "later");
    Ok(())
}

#[test]
fn unrepresentable_timeout_waits_for_completion() -> TestResult {
    init_tracing();
    let exec = executor();

    let status = exec.run_timed(Duration::MAX, FnOperation::shared(|| Ok(true)), true)?;
    assert_eq!(status, RunStatus::Success);

    let op = Arc::new(BlockingOperation::with_outcome(
        Duration::from_millis(100),
        false,
    ));
    let status = exec.run_timed(Duration::MAX, op.clone(), true)?;
    assert_eq!(status, RunStatus::Failed);
    assert_eq!(op.cancels(), 0);
    Ok(())
}

#[test]
fn unrepresentable_timeout_still_observes_interrupts() -> TestResult {
    init_tracing();
    let exec = Arc::new(executor().with_poll_interval(Duration::MAX));
    let op = Arc::new(BlockingOperation::new(Duration::from_secs(30)));

    let worker = {
        let exec = Arc::clone(&exec);
        let op: Arc<dyn Operation> = op.clone();
        thread::spawn(move || {
            exec.allow_interrupt(true);
            exec.run_timed(Duration::MAX, op, true)
        })
    };

    assert!(eventually(Duration::from_secs(5), || op.was_started()));
    exec.interrupt(worker.thread().id(), "give up");

    let outcome = worker.join().expect("worker panicked");
    assert_eq!(outcome.unwrap_err().message(), "give up");
    assert_eq!(op.cancels(), 1);
    Ok(())
}

/// Sleeps for `nap`, then succeeds. Counts cancels.
struct LateSuccess {
    nap: Duration,
    cancels: AtomicUsize,
}

impl Operation for LateSuccess {
    fn run(&self) -> ExecResult<bool> {
        thread::sleep(self.nap);
        Ok(true)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn finishing_at_the_deadline_reports_the_real_outcome() -> TestResult {
    init_tracing();
    // A single join slice ends exactly at the deadline.
    let exec = executor().with_poll_interval(Duration::from_secs(60));
    let timeout = Duration::from_millis(30);

    let mut outcomes = Vec::new();
    for _ in 0..25 {
        let op = Arc::new(LateSuccess {
            nap: timeout,
            cancels: AtomicUsize::new(0),
        });
        let status = exec.run_timed(timeout, op.clone(), false)?;
        let cancels = op.cancels.load(Ordering::SeqCst);
        match (status, cancels) {
            (RunStatus::Success, 0) | (RunStatus::TimedOut, 1) => {}
            other => panic!("inconsistent outcome {other:?}"),
        }
        outcomes.push(status);
    }

    assert!(outcomes
        .iter()
        .all(|s| matches!(s, RunStatus::Success | RunStatus::TimedOut)));
    Ok(())
}
