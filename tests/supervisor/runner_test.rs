//! Tests for the process supervisor against stub executables.

use std::time::Duration;

use claude_code_gateway::cli::SpawnError;
use claude_code_gateway::event::{ErrorKind, StreamEvent, TokenUsage};
use claude_code_gateway::session::{SessionError, SessionState};
use claude_code_gateway::supervisor::{InvocationRequest, ProcessSupervisor, SupervisorError};
use futures_util::StreamExt;
use tokio_test::{assert_err, assert_ok};

use crate::support::{self, Harness};

const MODEL: &str = "claude-3-5-haiku-20241022";

fn request(prompt: &str) -> InvocationRequest {
    InvocationRequest::new(MODEL, prompt)
}

async fn collect(invocation: claude_code_gateway::supervisor::Invocation) -> Vec<StreamEvent> {
    tokio::time::timeout(Duration::from_secs(10), invocation.collect::<Vec<_>>())
        .await
        .expect("invocation stream should end")
}

#[tokio::test]
async fn streams_text_usage_and_done() {
    let harness = Harness::new(support::HI_THERE);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("s1");

    let invocation = assert_ok!(supervisor.start(&session, request("hello")).await);
    assert_eq!(invocation.session_id(), "s1");
    assert_eq!(invocation.model(), MODEL);

    let events = collect(invocation).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::text("Hi"),
            StreamEvent::text(" there!"),
            StreamEvent::Usage(TokenUsage {
                prompt_tokens: 5,
                completion_tokens: 3,
            }),
            StreamEvent::done(),
        ]
    );

    support::wait_released(&session).await;
    assert_eq!(session.turns(), 1);
    assert_eq!(session.continuation().as_deref(), Some("claude-abc"));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(supervisor.in_flight(), 0);
}

#[tokio::test]
async fn runs_in_session_working_dir() {
    let harness = Harness::new(support::HI_THERE);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("cwd");

    collect(supervisor.start(&session, request("hello")).await.unwrap()).await;
    support::wait_released(&session).await;

    assert!(session.working_dir().is_dir());
    let args = support::recorded_args(&session);
    assert_eq!(args[0], "-p");
    assert_eq!(args[1], "hello");
    assert!(args.contains(&MODEL.to_string()));
    assert!(!args.contains(&"--resume".to_string()));
}

#[tokio::test]
async fn second_turn_resumes_with_last_user_prompt() {
    let harness = Harness::new(support::HI_THERE);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("resume");

    collect(supervisor.start(&session, request("User: hi")).await.unwrap()).await;
    support::wait_released(&session).await;

    let mut second = request("User: hi\n\nAssistant: Hi there!\n\nUser: again");
    second.resume_prompt = Some("again".to_string());
    collect(supervisor.start(&session, second).await.unwrap()).await;
    support::wait_released(&session).await;

    let args = support::recorded_args(&session);
    assert_eq!(args[1], "again");
    let pos = args.iter().position(|a| a == "--resume").unwrap();
    assert_eq!(args[pos + 1], "claude-abc");
    assert_eq!(session.turns(), 2);
}

#[tokio::test]
async fn no_resume_without_resume_prompt() {
    let harness = Harness::new(support::HI_THERE);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("fresh");

    collect(supervisor.start(&session, request("one")).await.unwrap()).await;
    support::wait_released(&session).await;
    collect(supervisor.start(&session, request("two")).await.unwrap()).await;
    support::wait_released(&session).await;

    let args = support::recorded_args(&session);
    assert_eq!(args[1], "two");
    assert!(!args.contains(&"--resume".to_string()));
}

#[tokio::test]
async fn nonzero_exit_reports_process_failed_with_stderr() {
    let harness = Harness::new(support::EXIT_ONE);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("fail");

    let events = collect(supervisor.start(&session, request("hello")).await.unwrap()).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::ProcessFailed { exit_code: Some(1) });
            assert!(message.contains("boom"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }

    support::wait_released(&session).await;
    assert_eq!(session.turns(), 0);
    assert!(session.continuation().is_none());
}

#[tokio::test]
async fn upstream_error_result_is_terminal() {
    let harness = Harness::new(support::UPSTREAM_ERROR);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("upstream");

    let events = collect(supervisor.start(&session, request("hello")).await.unwrap()).await;
    assert_eq!(
        events,
        vec![StreamEvent::error(ErrorKind::Upstream, "API overloaded")]
    );
}

#[tokio::test]
async fn malformed_line_does_not_end_stream() {
    let harness = Harness::new(support::GARBAGE_THEN_OK);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("garbage");

    let events = collect(supervisor.start(&session, request("hello")).await.unwrap()).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::error(ErrorKind::MalformedOutput, "this is not json"),
            StreamEvent::text("ok"),
            StreamEvent::done(),
        ]
    );
    support::wait_released(&session).await;
    assert_eq!(session.continuation().as_deref(), Some("claude-xyz"));
}

#[tokio::test]
async fn invalid_utf8_line_is_reported_and_stream_continues() {
    let harness = Harness::new(support::INVALID_UTF8);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("bytes");

    let events = collect(supervisor.start(&session, request("hello")).await.unwrap()).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::text("Hi"),
            StreamEvent::error(ErrorKind::MalformedOutput, "\u{fffd}\u{fffd} not utf8"),
            StreamEvent::text(" there!"),
            StreamEvent::done(),
        ]
    );
    support::wait_released(&session).await;
    assert_eq!(session.turns(), 1);
    assert_eq!(session.continuation().as_deref(), Some("claude-utf"));
}

#[tokio::test]
async fn idle_timeout_is_the_only_event() {
    let harness = Harness::new(support::SILENT);
    let supervisor = harness.supervisor(|o| o.idle_timeout = Duration::from_millis(300));
    let session = harness.session("idle");

    let events = collect(supervisor.start(&session, request("hello")).await.unwrap()).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].error_kind(), Some(ErrorKind::Timeout));

    support::wait_released(&session).await;
    assert_eq!(supervisor.in_flight(), 0);
}

#[tokio::test]
async fn deadline_keeps_partial_output() {
    let harness = Harness::new(support::HI_THEN_HANG);
    let supervisor =
        harness.supervisor(|o| o.invocation_timeout = Duration::from_millis(500));
    let session = harness.session("deadline");

    let events = collect(supervisor.start(&session, request("hello")).await.unwrap()).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::text("Hi"));
    assert_eq!(events[1].error_kind(), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn cancel_ends_with_cancelled_and_releases_session() {
    let harness = Harness::new(support::HI_THEN_HANG);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("cancel");

    let mut invocation = supervisor.start(&session, request("hello")).await.unwrap();
    assert_eq!(invocation.next().await, Some(StreamEvent::text("Hi")));
    invocation.cancel();
    assert!(invocation.is_cancelled());

    let rest = collect(invocation).await;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].error_kind(), Some(ErrorKind::Cancelled));

    support::wait_released(&session).await;
    assert_eq!(session.turns(), 0);
    assert_eq!(supervisor.in_flight(), 0);
}

#[tokio::test]
async fn cancel_kills_subprocesses_of_the_tool() {
    let harness = Harness::new(support::SPAWNS_SUBPROCESS);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("tree");

    let mut invocation = supervisor.start(&session, request("hello")).await.unwrap();
    assert_eq!(invocation.next().await, Some(StreamEvent::text("Hi")));
    let grandchild = support::recorded_pid(&session, "grandchild.pid");
    assert!(support::process_alive(grandchild));

    invocation.cancel();
    let rest = collect(invocation).await;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].error_kind(), Some(ErrorKind::Cancelled));

    assert!(
        support::wait_gone(grandchild, Duration::from_secs(2)).await,
        "subprocess {grandchild} survived cancellation"
    );
    support::wait_released(&session).await;
}

#[tokio::test]
async fn cancel_escalates_to_sigkill_when_sigterm_is_ignored() {
    let harness = Harness::new(support::IGNORES_TERM);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("stubborn");
    let grace = support::test_options(harness.binary.clone()).terminate_grace;

    let mut invocation = supervisor.start(&session, request("hello")).await.unwrap();
    assert_eq!(invocation.next().await, Some(StreamEvent::text("Hi")));
    let pid = support::recorded_pid(&session, "child.pid");
    assert!(support::process_alive(pid));

    let cancelled_at = tokio::time::Instant::now();
    invocation.cancel();
    let rest = collect(invocation).await;
    let elapsed = cancelled_at.elapsed();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].error_kind(), Some(ErrorKind::Cancelled));

    // SIGTERM is ignored, so only the SIGKILL after the grace period ends it.
    assert!(elapsed >= grace.mul_f32(0.8), "ended after {elapsed:?}");
    assert!(elapsed < grace + Duration::from_secs(2), "ended after {elapsed:?}");
    assert!(!support::process_alive(pid), "process {pid} still running");

    support::wait_released(&session).await;
    assert!(!session.is_busy());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(supervisor.in_flight(), 0);
}

#[tokio::test]
async fn dropping_invocation_releases_session() {
    let harness = Harness::new(support::SILENT);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("dropped");

    let invocation = supervisor.start(&session, request("hello")).await.unwrap();
    assert!(session.is_busy());
    drop(invocation);

    support::wait_released(&session).await;
    assert_eq!(supervisor.in_flight(), 0);
}

#[tokio::test]
async fn terminating_session_cancels_running_invocation() {
    let harness = Harness::new(support::SILENT);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("doomed");

    let invocation = supervisor.start(&session, request("hello")).await.unwrap();
    harness.registry.terminate("doomed").unwrap();

    let events = collect(invocation).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].error_kind(), Some(ErrorKind::Cancelled));

    support::wait_released(&session).await;
    assert_eq!(session.state(), SessionState::Terminated);
    let err = supervisor.start(&session, request("again")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::SessionTerminated(id) if id == "doomed"));
}

#[tokio::test]
async fn busy_session_rejects_second_invocation() {
    let harness = Harness::new(support::SILENT);
    let supervisor = harness.supervisor(|_| {});
    let session = harness.session("busy");

    let first = supervisor.start(&session, request("one")).await.unwrap();
    let err = assert_err!(supervisor.start(&session, request("two")).await);
    assert!(matches!(
        err,
        SupervisorError::Session(SessionError::Busy { .. })
    ));

    first.cancel();
    collect(first).await;
    support::wait_released(&session).await;
}

#[tokio::test]
async fn capacity_is_enforced_across_sessions() {
    let harness = Harness::new(support::SILENT);
    let supervisor = harness.supervisor(|o| o.max_concurrent = 1);
    let a = harness.session("a");
    let b = harness.session("b");

    let first = supervisor.start(&a, request("one")).await.unwrap();
    assert_eq!(supervisor.in_flight(), 1);

    let err = assert_err!(supervisor.start(&b, request("two")).await);
    assert!(matches!(err, SupervisorError::CapacityExceeded { limit: 1 }));
    assert!(!b.is_busy());

    first.cancel();
    collect(first).await;
    support::wait_released(&a).await;
    assert_eq!(supervisor.in_flight(), 0);
}

#[tokio::test]
async fn missing_binary_fails_to_spawn_and_releases() {
    let harness = Harness::new(support::HI_THERE);
    let supervisor = harness.supervisor(|o| o.binary = "/nonexistent/claude".into());
    let session = harness.session("missing");

    let err = supervisor.start(&session, request("hello")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn(SpawnError::NotFound(_))));
    assert!(!session.is_busy());
    assert_eq!(supervisor.in_flight(), 0);
}

#[tokio::test]
async fn version_reports_stub_version() {
    let harness = Harness::new(support::SILENT);
    let supervisor: ProcessSupervisor = harness.supervisor(|_| {});
    assert_eq!(supervisor.version().await.unwrap(), "1.0.0 (Claude Code)");
}
