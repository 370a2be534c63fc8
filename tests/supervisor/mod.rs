//! Supervisor and session tests against stub Claude executables.

mod runner_test;

/// Verify the public supervisor types are exported from the library.
#[test]
fn test_supervisor_types_exported() {
    use claude_code_gateway::supervisor::{
        InvocationRequest, SupervisorError, SupervisorOptions, DEFAULT_MAX_CONCURRENT,
        DEFAULT_TERMINATE_TIMEOUT,
    };

    let options = SupervisorOptions::default();
    assert_eq!(options.max_concurrent, DEFAULT_MAX_CONCURRENT);
    assert_eq!(options.terminate_grace, DEFAULT_TERMINATE_TIMEOUT);

    let request = InvocationRequest::new("claude-3-5-haiku-20241022", "hello");
    assert!(request.resume_prompt.is_none());

    let _: fn() -> SupervisorError = || SupervisorError::NoStdout;
}
