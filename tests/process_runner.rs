#![cfg(unix)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use harness_exec::errors::ExecError;
use harness_exec::exec::{
    CaptureBuffer, Operation, ProcessRunner, ProcessSettings, RunPhase, RunnerTiming,
};
use harness_exec::types::RunStatus;
use harness_exec_test_utils::process_exists;

use common::{eventually, executor, init_tracing, sh};

type TestResult = Result<(), Box<dyn Error>>;

fn runner(argv: Vec<String>) -> ProcessRunner {
    ProcessRunner::new(argv, ProcessSettings::default())
}

#[test]
fn captures_stdout_stderr_and_exit_code() -> TestResult {
    init_tracing();
    let process = runner(sh("echo hello; echo oops 1>&2"));

    assert!(process.run()?);

    let result = process.result();
    assert_eq!(result.status(), RunStatus::Success);
    assert_eq!(result.stdout(), "hello\n");
    assert_eq!(result.stderr(), "oops\n");
    assert_eq!(result.exit_code(), Some(0));
    assert_eq!(process.phase(), RunPhase::Done);
    Ok(())
}

#[test]
fn nonzero_exit_is_failure_with_code() -> TestResult {
    init_tracing();
    let process = runner(sh("echo partial; exit 3"));

    assert!(!process.run()?);

    let result = process.result();
    assert_eq!(result.status(), RunStatus::Failed);
    assert_eq!(result.exit_code(), Some(3));
    assert_eq!(result.stdout(), "partial\n");
    Ok(())
}

#[test]
fn runs_at_most_once() -> TestResult {
    init_tracing();
    let process = runner(sh("true"));

    assert!(process.run()?);
    assert!(matches!(process.run(), Err(ExecError::AlreadyStarted)));
    Ok(())
}

#[test]
fn cancel_before_start_skips_spawn() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("spawned");
    let process = runner(sh(&format!("touch {}", marker.display())));

    process.cancel();
    assert!(process.is_cancelled());
    assert!(!process.run()?);

    assert_eq!(process.phase(), RunPhase::Done);
    assert_eq!(process.result().status(), RunStatus::Failed);
    assert!(!marker.exists());
    Ok(())
}

#[test]
fn cancel_after_completion_is_a_no_op() -> TestResult {
    init_tracing();
    let process = runner(sh("echo done"));

    assert!(process.run()?);
    process.cancel();
    process.cancel();

    assert_eq!(process.phase(), RunPhase::Done);
    assert_eq!(process.result().stdout(), "done\n");
    Ok(())
}

#[test]
fn spawn_failure_is_an_error() {
    init_tracing();
    let process = runner(vec!["/definitely/not/a/program".to_string()]);

    let err = process.run().unwrap_err();
    assert!(matches!(err, ExecError::Spawn { .. }), "got {err:?}");
    assert_eq!(process.result().status(), RunStatus::ExceptionThrown);
    assert_eq!(process.phase(), RunPhase::Done);
}

#[test]
fn empty_command_is_rejected() {
    init_tracing();
    let process = runner(Vec::new());
    assert!(matches!(process.run(), Err(ExecError::ConfigError(_))));
}

#[test]
fn input_is_written_to_stdin() -> TestResult {
    init_tracing();
    let process = runner(vec!["cat".to_string()]).with_input("line one\nline two\n");

    assert!(process.run()?);
    assert_eq!(process.result().stdout(), "line one\nline two\n");
    Ok(())
}

#[test]
fn external_writers_receive_output_instead_of_result() -> TestResult {
    init_tracing();
    let out = CaptureBuffer::new();
    let err = CaptureBuffer::new();
    let process = runner(sh("echo to-out; echo to-err 1>&2"))
        .with_output(Box::new(out.clone()), Box::new(err.clone()));

    assert!(process.run()?);

    assert_eq!(out.contents(), "to-out\n");
    assert_eq!(err.contents(), "to-err\n");
    assert_eq!(process.result().stdout(), "");
    assert_eq!(process.result().stderr(), "");
    Ok(())
}

#[test]
fn stderr_redirect_merges_streams() -> TestResult {
    init_tracing();
    let settings = ProcessSettings {
        redirect_stderr_to_stdout: true,
        ..ProcessSettings::default()
    };
    let process = ProcessRunner::new(sh("echo out; echo err 1>&2"), settings);

    assert!(process.run()?);

    let result = process.result();
    assert!(result.stdout().contains("out\n"));
    assert!(result.stdout().contains("err\n"));
    assert_eq!(result.stderr(), "");
    Ok(())
}

#[test]
fn timeout_destroys_the_process() -> TestResult {
    init_tracing();
    let exec = executor();
    let process = Arc::new(runner(sh("echo $$; exec sleep 30")));

    let started = Instant::now();
    let status = exec.run_timed(Duration::from_millis(300), process.clone(), true)?;

    assert_eq!(status, RunStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(process.phase(), RunPhase::Done);

    let pid: u32 = process.result().stdout().trim().parse()?;
    assert!(eventually(Duration::from_secs(2), || !process_exists(pid)));
    Ok(())
}

#[test]
fn timeout_is_not_held_up_by_grandchildren_keeping_pipes_open() -> TestResult {
    init_tracing();
    let exec = executor();
    let process = Arc::new(runner(sh("sleep 30 & sleep 30")));

    let started = Instant::now();
    let status = exec.run_timed(Duration::from_millis(200), process.clone(), true)?;

    assert_eq!(status, RunStatus::TimedOut);
    // Well under the default cancel grace period.
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(process.phase(), RunPhase::Done);
    Ok(())
}

#[test]
fn pump_join_is_bounded_after_exit() -> TestResult {
    init_tracing();
    // The shell exits at once; its background child keeps stdout open.
    let process = runner(sh("sleep 30 & echo parent-done")).with_timing(RunnerTiming {
        cancel_grace: Duration::from_secs(5),
        pump_join: Duration::from_millis(200),
    });

    let started = Instant::now();
    assert!(process.run()?);

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(process.result().stdout().contains("parent-done"));
    Ok(())
}

#[test]
fn cancel_forces_the_run_loose_when_output_never_drains() -> TestResult {
    init_tracing();
    let exec = executor();
    // The setsid'd sleep escapes the process group and keeps stdout open.
    let process = Arc::new(
        runner(sh("setsid sleep 20 & echo started; exec sleep 20")).with_timing(RunnerTiming {
            cancel_grace: Duration::from_millis(300),
            pump_join: Duration::from_secs(10),
        }),
    );

    let started = Instant::now();
    let status = exec.run_timed(Duration::from_millis(200), process.clone(), true)?;

    assert_eq!(status, RunStatus::TimedOut);
    assert_eq!(process.phase(), RunPhase::Done);
    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    assert_eq!(process.result().stdout(), "started\n");
    Ok(())
}

#[test]
fn cancel_while_draining_reaches_group_left_behind_by_exited_child() -> TestResult {
    init_tracing();
    let exec = executor();
    // The shell exits at once; its background sleep stays in the group and
    // holds stdout open.
    let process = Arc::new(runner(sh("sleep 20 & echo $!")).with_timing(RunnerTiming {
        cancel_grace: Duration::from_secs(8),
        pump_join: Duration::from_secs(10),
    }));

    let started = Instant::now();
    let status = exec.run_timed(Duration::from_millis(300), process.clone(), true)?;

    assert_eq!(status, RunStatus::TimedOut);
    assert_eq!(process.phase(), RunPhase::Done);
    // Freed by the group signal, not by the forced path after the grace.
    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    assert_eq!(process.result().exit_code(), Some(0));
    assert!(!process.result().stdout().trim().is_empty());
    Ok(())
}
