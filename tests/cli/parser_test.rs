//! Tests for turning stream-json transcripts into stream events.

use claude_code_gateway::cli::{ClaudeEvent, OutputParser, ParseError};
use claude_code_gateway::event::{ErrorKind, FinishReason, StreamEvent, TokenUsage};

fn parse_all(lines: &[&str]) -> (Vec<StreamEvent>, OutputParser) {
    let mut parser = OutputParser::new();
    let events = lines.iter().flat_map(|line| parser.parse(line)).collect();
    (events, parser)
}

#[test]
fn partial_transcript_yields_deltas_usage_and_done() {
    let (events, parser) = parse_all(&[
        r#"{"type":"system","subtype":"init","session_id":"claude-abc","tools":["Bash"]}"#,
        r#"{"type":"stream_event","event":{"type":"message_start","message":{"id":"msg_1"}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there!"}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#,
        r#"{"type":"assistant","message":{"id":"msg_1","content":[{"type":"text","text":"Hi there!"}]}}"#,
        r#"{"type":"stream_event","event":{"type":"message_stop"}}"#,
        r#"{"type":"result","subtype":"success","is_error":false,"result":"Hi there!","session_id":"claude-abc","usage":{"input_tokens":5,"output_tokens":3}}"#,
    ]);

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
    assert_eq!(parser.session_id(), Some("claude-abc"));
}

#[test]
fn tool_use_is_assembled_from_fragments() {
    let (events, _) = parse_all(&[
        r#"{"type":"stream_event","event":{"type":"message_start","message":{"id":"msg_1"}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"Bash","input":{}}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"command\":"}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"ls\"}"}}}"#,
        r#"{"type":"stream_event","event":{"type":"content_block_stop","index":1}}"#,
        r#"{"type":"assistant","message":{"id":"msg_1","content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls"}}]}}"#,
    ]);

    assert_eq!(
        events,
        vec![StreamEvent::ToolUse {
            name: "Bash".to_string(),
            payload: serde_json::json!({"command": "ls"}),
        }]
    );
}

#[test]
fn max_turns_result_finishes_with_length() {
    let (events, _) = parse_all(&[
        r#"{"type":"result","subtype":"error_max_turns","is_error":true,"num_turns":3}"#,
    ]);
    assert_eq!(
        events,
        vec![StreamEvent::Done {
            finish_reason: FinishReason::Length,
        }]
    );
}

#[test]
fn error_result_is_upstream_error() {
    let (events, _) = parse_all(&[
        r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"API overloaded"}"#,
    ]);
    assert_eq!(events, vec![StreamEvent::error(ErrorKind::Upstream, "API overloaded")]);
    assert!(events[0].is_terminal());
}

#[test]
fn garbage_line_is_not_terminal() {
    let (events, _) = parse_all(&["not json", r#"{"type":"mystery"}"#]);
    assert_eq!(events.len(), 2);
    for event in &events {
        assert_eq!(event.error_kind(), Some(ErrorKind::MalformedOutput));
        assert!(!event.is_terminal());
    }
}

#[test]
fn parse_line_classifies_records() {
    assert!(matches!(OutputParser::parse_line("  "), Err(ParseError::Empty)));
    assert!(matches!(
        OutputParser::parse_line("{"),
        Err(ParseError::Invalid { .. })
    ));

    let event = OutputParser::parse_line(
        r#"{"type":"result","subtype":"success","session_id":"s"}"#,
    )
    .expect("result record should parse");
    assert!(event.is_terminal());
    assert_eq!(event.session_id(), Some("s"));
    assert!(matches!(event, ClaudeEvent::Result(_)));
}
