mod common;

use std::error::Error;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use harness_exec::interrupt::{DeferredInterruptWatchdog, InterruptRegistry};

use common::{eventually, executor, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn second_schedule_is_ignored_while_first_is_pending() {
    init_tracing();
    let exec = executor();
    let me = thread::current().id();

    assert!(exec.set_interruptible_in_future(me, Duration::from_secs(30)));
    assert!(!exec.set_interruptible_in_future(me, Duration::from_millis(1)));
    assert!(exec.watchdog().is_pending());

    // The ignored request must not have armed a second timer.
    thread::sleep(Duration::from_millis(100));
    assert!(!exec.registry().is_force_interruptible());

    assert!(exec.watchdog().cancel());
    assert!(!exec.watchdog().is_pending());
}

#[test]
fn firing_forces_interruptibility() {
    init_tracing();
    let registry = Arc::new(InterruptRegistry::new());
    let watchdog = DeferredInterruptWatchdog::new(Arc::clone(&registry));

    assert!(watchdog.schedule(thread::current().id(), Duration::from_millis(50)));
    assert!(eventually(Duration::from_secs(5), || watchdog.has_fired()));

    assert!(registry.is_force_interruptible());
    assert!(!watchdog.is_pending());
    // Once fired, a new escalation may be scheduled.
    assert!(watchdog.schedule(thread::current().id(), Duration::from_secs(30)));
    assert!(watchdog.cancel());
}

#[test]
fn cancelled_escalation_never_fires() {
    init_tracing();
    let registry = Arc::new(InterruptRegistry::new());
    let watchdog = DeferredInterruptWatchdog::new(Arc::clone(&registry));

    assert!(watchdog.schedule(thread::current().id(), Duration::from_millis(100)));
    assert!(watchdog.cancel());
    thread::sleep(Duration::from_millis(250));

    assert!(!watchdog.has_fired());
    assert!(!registry.is_force_interruptible());
}

#[test]
fn escalation_delivers_pending_interrupt_to_uncooperative_thread() -> TestResult {
    init_tracing();
    let exec = Arc::new(executor());
    let (ready_tx, ready_rx) = mpsc::channel();

    let worker = {
        let exec = Arc::clone(&exec);
        thread::spawn(move || {
            // Never opts in.
            ready_tx.send(()).unwrap();
            let started = Instant::now();
            let outcome = exec.sleep(Duration::from_secs(30));
            (outcome, started.elapsed())
        })
    };

    ready_rx.recv()?;
    let target = worker.thread().id();
    exec.interrupt(target, "shutting down");
    assert!(exec.set_interruptible_in_future(target, Duration::from_millis(200)));

    let (outcome, elapsed) = worker.join().expect("worker panicked");
    assert_eq!(outcome.unwrap_err().message(), "shutting down");
    assert!(elapsed < Duration::from_secs(5));
    Ok(())
}
