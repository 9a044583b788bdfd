//! Command runner behaviour: working directory, exit codes, timeouts.
#![cfg(unix)]

use std::time::{Duration, Instant};

use codeloop::runner::CommandRunner;
use codeloop::tools::ToolError;
use tempfile::TempDir;

fn runner() -> (TempDir, CommandRunner) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let root = dir.path().canonicalize().unwrap();
    (dir, CommandRunner::new(root))
}

#[tokio::test]
async fn commands_run_in_the_workspace_root() {
    let (dir, runner) = runner();
    let out = runner.run("pwd").await.unwrap();
    assert_eq!(
        out.stdout.trim(),
        dir.path().canonicalize().unwrap().to_string_lossy()
    );

    runner.run("echo made > marker.txt").await.unwrap();
    assert!(dir.path().join("marker.txt").exists());
}

#[tokio::test]
async fn non_zero_exit_is_a_normal_result() {
    let (_dir, runner) = runner();
    let out = runner.run("echo boom 1>&2; exit 3").await.unwrap();
    assert_eq!(out.exit_code, Some(3));
    assert!(!out.success());
    assert_eq!(out.stderr.trim(), "boom");
    assert!(out.stdout.is_empty());
}

#[tokio::test]
async fn missing_program_reports_through_stderr() {
    let (_dir, runner) = runner();
    let out = runner
        .run("definitely-not-a-real-program-xyz")
        .await
        .unwrap();
    assert_eq!(out.exit_code, Some(127));
    assert!(!out.stderr.is_empty());
}

#[tokio::test]
async fn long_command_is_killed_at_the_timeout() {
    let (_dir, runner) = runner();
    let started = Instant::now();
    let err = runner
        .run_with_timeout("sleep 10", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Timeout { seconds: 1 }), "got {err:?}");
    assert!(err.to_string().starts_with("Timeout"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn background_children_die_with_the_group() {
    let (_dir, runner) = runner();
    let started = Instant::now();
    let err = runner
        .run_with_timeout("sleep 30 & sleep 30; wait", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn default_timeout_is_used_by_run() {
    let (_dir, runner) = runner();
    let runner = runner.with_default_timeout(Duration::from_secs(1));
    assert_eq!(runner.default_timeout(), Duration::from_secs(1));
    let err = runner.run("sleep 5").await.unwrap_err();
    assert!(matches!(err, ToolError::Timeout { .. }));
}

#[tokio::test]
async fn large_output_is_capped() {
    let (_dir, runner) = runner();
    let out = runner
        .run("head -c 400000 /dev/zero | tr '\\0' 'a'")
        .await
        .unwrap();
    assert!(out.truncated);
    assert_eq!(out.stdout.len(), codeloop::runner::MAX_OUTPUT);
    assert!(out.success());
}

#[tokio::test]
async fn output_survives_a_background_job_holding_the_pipes() {
    let (_dir, runner) = runner();
    let started = Instant::now();
    let out = runner
        .run("echo hello; echo warn 1>&2; sleep 5 &")
        .await
        .unwrap();
    assert_eq!(out.stdout, "hello\n");
    assert_eq!(out.stderr, "warn\n");
    assert_eq!(out.exit_code, Some(0));
    assert!(!out.truncated);
    // Both pipes share one grace period.
    assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
}

#[tokio::test]
async fn invalid_utf8_output_is_decoded_lossily() {
    let (_dir, runner) = runner();
    let out = runner.run("printf 'ok\\377'").await.unwrap();
    assert!(out.stdout.starts_with("ok"));
    assert!(out.stdout.contains('\u{FFFD}'));
}
