#![cfg(unix)]

mod common;

use std::error::Error;
use std::io::Write;

use clap::Parser;
use tempfile::NamedTempFile;

use harness_exec::cli::CliArgs;
use harness_exec::{EXIT_TIMED_OUT, EXIT_EXCEPTION};

use common::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
    CliArgs::try_parse_from(std::iter::once("harness-exec").chain(args.iter().copied()))
}

#[test]
fn command_is_required() {
    assert!(parse(&["--timeout-ms", "10"]).is_err());
}

#[test]
fn trailing_command_keeps_its_own_flags() -> TestResult {
    let args = parse(&[
        "--env",
        "A=1",
        "--unset",
        "B",
        "--env-priority",
        "set",
        "ls",
        "-la",
        "--color",
    ])?;

    assert_eq!(args.env, vec![("A".to_string(), "1".to_string())]);
    assert_eq!(args.unset, vec!["B".to_string()]);
    assert_eq!(args.command, vec!["ls", "-la", "--color"]);
    assert_eq!(args.shutdown_grace_ms, 10_000);
    Ok(())
}

#[test]
fn malformed_env_pair_is_rejected() {
    assert!(parse(&["--env", "NOVALUE", "true"]).is_err());
    assert!(parse(&["--env", "=x", "true"]).is_err());
}

#[tokio::test]
async fn exit_code_mirrors_the_command() -> TestResult {
    init_tracing();

    let code = harness_exec::run(parse(&["--", "sh", "-c", "exit 0"])?).await?;
    assert_eq!(code, 0);

    let code = harness_exec::run(parse(&["sh", "-c", "exit 4"])?).await?;
    assert_eq!(code, 4);
    Ok(())
}

#[tokio::test]
async fn timeout_and_spawn_failure_have_reserved_codes() -> TestResult {
    init_tracing();

    let code = harness_exec::run(parse(&["--timeout-ms", "200", "sleep", "30"])?).await?;
    assert_eq!(code, EXIT_TIMED_OUT);

    let code = harness_exec::run(parse(&["/no/such/binary"])?).await?;
    assert_eq!(code, EXIT_EXCEPTION);
    Ok(())
}

#[tokio::test]
async fn retries_come_from_config_file() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let counter = dir.path().join("count");
    let mut config = NamedTempFile::new()?;
    write!(config, "[retry]\nattempts = 3\ninterval_ms = 10\n")?;

    let script = format!(
        "n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {c}; [ $n -ge 2 ]",
        c = counter.display()
    );
    let config_path = config.path().display().to_string();
    let args = parse(&["--config", &config_path, "sh", "-c", &script])?;

    assert_eq!(harness_exec::run(args).await?, 0);
    assert_eq!(std::fs::read_to_string(&counter)?.trim(), "2");
    Ok(())
}

#[tokio::test]
async fn bad_config_is_an_error() -> TestResult {
    init_tracing();
    let mut config = NamedTempFile::new()?;
    write!(config, "[retry]\nattempts = 0\n")?;
    let config_path = config.path().display().to_string();

    let outcome = harness_exec::run(parse(&["--config", &config_path, "true"])?).await;
    assert!(outcome.is_err());
    Ok(())
}
