//! Tests for Claude process spawning and control.

use std::time::Duration;

use claude_code_gateway::cli::{claude_version, ClaudeProcess, ClaudeProcessBuilder, SpawnError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_test::{assert_err, assert_ok};

use crate::support;

#[test]
fn builder_new_creates_with_prompt() {
    let builder = ClaudeProcessBuilder::new("Fix the bug");
    let args = builder.build_args();

    assert_eq!(args[0], "-p");
    assert_eq!(args[1], "Fix the bug");
    assert!(args.contains(&"--output-format".to_string()));
    assert!(args.contains(&"stream-json".to_string()));
    assert!(args.contains(&"--verbose".to_string()));
    assert!(args.contains(&"--include-partial-messages".to_string()));
    assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
}

#[test]
fn builder_resume_session() {
    let builder = ClaudeProcessBuilder::new("continue").resume("session_abc123");
    let args = builder.build_args();

    let pos = args.iter().position(|a| a == "--resume").unwrap();
    assert_eq!(args[pos + 1], "session_abc123");
}

#[test]
fn builder_model_and_system_prompt() {
    let args = ClaudeProcessBuilder::new("task")
        .model("claude-sonnet-4-20250514")
        .system_prompt("Be terse")
        .build_args();

    let pos = args.iter().position(|a| a == "--model").unwrap();
    assert_eq!(args[pos + 1], "claude-sonnet-4-20250514");
    let pos = args.iter().position(|a| a == "--system-prompt").unwrap();
    assert_eq!(args[pos + 1], "Be terse");
}

#[test]
fn builder_extra_args_come_last() {
    let args = ClaudeProcessBuilder::new("task")
        .skip_permissions(false)
        .extra_args(["--max-turns", "3"])
        .build_args();

    assert!(!args.contains(&"--dangerously-skip-permissions".to_string()));
    assert_eq!(&args[args.len() - 2..], ["--max-turns", "3"]);
}

#[test]
fn builder_working_dir() {
    let builder = ClaudeProcessBuilder::new("task").working_dir("/tmp/project");
    assert_eq!(
        builder.get_working_dir().map(|p| p.to_str().unwrap()),
        Some("/tmp/project")
    );
    assert_eq!(builder.prompt(), "task");
}

#[tokio::test]
async fn spawn_missing_binary_is_not_found() {
    let builder = ClaudeProcessBuilder::new("task");
    let err = ClaudeProcess::spawn_with_binary("/nonexistent/claude", &builder).unwrap_err();
    assert!(matches!(err, SpawnError::NotFound(_)));
    assert!(err.to_string().contains("/nonexistent/claude"));
}

#[tokio::test]
async fn spawn_stub_streams_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let binary = support::write_stub(dir.path(), support::HI_THERE);
    let builder = ClaudeProcessBuilder::new("hello").working_dir(dir.path());

    let mut process = ClaudeProcess::spawn_with_binary(&binary, &builder).unwrap();
    let stdout = process.take_stdout().expect("stdout is piped");
    assert!(process.take_stdout().is_none());

    let mut lines = BufReader::new(stdout).lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await.unwrap() {
        assert!(line.starts_with('{'));
        count += 1;
    }
    assert_eq!(count, 6);
    assert!(process.wait().await.unwrap().success());
}

#[tokio::test]
async fn graceful_terminate_stops_hanging_process() {
    let dir = tempfile::tempdir().unwrap();
    let binary = support::write_stub(dir.path(), support::SILENT);
    let builder = ClaudeProcessBuilder::new("hello").working_dir(dir.path());

    let mut process = ClaudeProcess::spawn_with_binary(&binary, &builder).unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        process.graceful_terminate(Duration::from_millis(500)),
    )
    .await
    .expect("termination should not hang")
    .unwrap();
    assert!(process.try_wait().unwrap().is_some());
}

#[tokio::test]
async fn version_of_stub() {
    let dir = tempfile::tempdir().unwrap();
    let binary = support::write_stub(dir.path(), support::SILENT);
    let version = assert_ok!(claude_version(&binary).await);
    assert_eq!(version, "1.0.0 (Claude Code)");
}

#[tokio::test]
async fn version_of_missing_binary_fails() {
    let err = assert_err!(claude_version("/nonexistent/claude").await);
    assert!(matches!(err, SpawnError::NotFound(_)));
}
