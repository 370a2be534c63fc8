//! Output parser turning stream-json lines into [`StreamEvent`]s.

use std::collections::HashSet;

use crate::cli::{ApiStreamEvent, ClaudeEvent, ContentBlock, ContentDelta, ResultEvent};
use crate::event::{ErrorKind, FinishReason, StreamEvent, TokenUsage};

/// Result subtype reported when the tool ran out of turns.
const MAX_TURNS_SUBTYPE: &str = "error_max_turns";

/// Error type for single-line parsing.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// Line was empty or only whitespace.
    #[error("Empty line")]
    Empty,
    /// Line is not a known stream-json record.
    #[error("Failed to parse line: {reason}")]
    Invalid { input: String, reason: String },
}

/// A tool-use block whose input is still arriving as JSON fragments.
#[derive(Debug)]
struct PendingToolUse {
    index: usize,
    id: String,
    name: String,
    initial_input: serde_json::Value,
    partial_json: String,
}

/// Stateful line parser for one invocation.
///
/// Cross-line state is limited to what the stream-json framing requires:
/// the tool-use block being assembled from `input_json_delta` fragments, and
/// which messages and tool uses were already relayed incrementally so the
/// trailing complete `assistant` record does not duplicate them.
#[derive(Debug, Default)]
pub struct OutputParser {
    session_id: Option<String>,
    cost_usd: Option<f64>,
    current_message: Option<String>,
    current_message_streamed: bool,
    streamed_messages: HashSet<String>,
    streamed_tools: HashSet<String>,
    pending_tool: Option<PendingToolUse>,
}

impl OutputParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claude's own session id, once any record has carried it.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Cost reported by the `result` record, if any.
    #[must_use]
    pub fn cost_usd(&self) -> Option<f64> {
        self.cost_usd
    }

    /// Parse a single line of stream-json output without any stream context.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Empty` for blank lines and `ParseError::Invalid`
    /// for anything that is not a known record.
    pub fn parse_line(line: &str) -> Result<ClaudeEvent, ParseError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }
        serde_json::from_str(trimmed).map_err(|e| ParseError::Invalid {
            input: line.to_string(),
            reason: e.to_string(),
        })
    }

    /// Like [`parse`](Self::parse) for a raw line of child output. Bytes that
    /// are not UTF-8 become a `MalformedOutput` error with a lossy rendering.
    pub fn parse_bytes(&mut self, line: &[u8]) -> Vec<StreamEvent> {
        match std::str::from_utf8(line) {
            Ok(line) => self.parse(line),
            Err(e) => {
                tracing::warn!(error = %e, "Non UTF-8 line from Claude process");
                vec![StreamEvent::error(
                    ErrorKind::MalformedOutput,
                    String::from_utf8_lossy(line),
                )]
            }
        }
    }

    /// Turn one line of output into zero or more events.
    ///
    /// Blank lines and bookkeeping records produce nothing. A line that
    /// cannot be understood produces a single `MalformedOutput` error event
    /// carrying the raw line.
    pub fn parse(&mut self, line: &str) -> Vec<StreamEvent> {
        let event = match Self::parse_line(line) {
            Ok(event) => event,
            Err(ParseError::Empty) => return Vec::new(),
            Err(ParseError::Invalid { input, reason }) => {
                tracing::warn!(%reason, "Malformed line from Claude process");
                return vec![StreamEvent::error(ErrorKind::MalformedOutput, input)];
            }
        };

        if let Some(id) = event.session_id() {
            if self.session_id.as_deref() != Some(id) {
                tracing::debug!(claude_session_id = %id, "Captured Claude session id");
                self.session_id = Some(id.to_string());
            }
        }

        match event {
            ClaudeEvent::System(_) | ClaudeEvent::User { .. } => Vec::new(),
            ClaudeEvent::StreamEvent { event, .. } => self.handle_stream_event(event),
            ClaudeEvent::Assistant { message, .. } => {
                let already_streamed = match &message.id {
                    Some(id) => self.streamed_messages.contains(id),
                    None => self.current_message_streamed,
                };
                let mut events = Vec::new();
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } if !already_streamed && !text.is_empty() => {
                            events.push(StreamEvent::text(text));
                        }
                        ContentBlock::ToolUse { id, name, input }
                            if !self.streamed_tools.contains(&id) =>
                        {
                            self.streamed_tools.insert(id);
                            events.push(StreamEvent::ToolUse {
                                name,
                                payload: input,
                            });
                        }
                        _ => {}
                    }
                }
                events
            }
            ClaudeEvent::Result(result) => self.handle_result(result),
        }
    }

    fn handle_stream_event(&mut self, event: ApiStreamEvent) -> Vec<StreamEvent> {
        match event {
            ApiStreamEvent::MessageStart { message } => {
                self.current_message = message
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .map(String::from);
                self.current_message_streamed = false;
                Vec::new()
            }
            ApiStreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name, input },
            } => {
                self.pending_tool = Some(PendingToolUse {
                    index,
                    id,
                    name,
                    initial_input: input,
                    partial_json: String::new(),
                });
                Vec::new()
            }
            ApiStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => {
                    self.mark_streamed();
                    if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![StreamEvent::text(text)]
                    }
                }
                ContentDelta::InputJsonDelta { partial_json } => {
                    match self.pending_tool.as_mut() {
                        Some(pending) if pending.index == index => {
                            pending.partial_json.push_str(&partial_json);
                            Vec::new()
                        }
                        _ => vec![StreamEvent::error(
                            ErrorKind::MalformedOutput,
                            format!("input_json_delta for unknown block {index}: {partial_json}"),
                        )],
                    }
                }
                ContentDelta::Unknown => Vec::new(),
            },
            ApiStreamEvent::ContentBlockStop { index } => {
                match self.pending_tool.take() {
                    Some(pending) if pending.index == index => self.finish_tool(pending),
                    other => {
                        self.pending_tool = other;
                        Vec::new()
                    }
                }
            }
            ApiStreamEvent::ContentBlockStart { .. }
            | ApiStreamEvent::MessageDelta { .. }
            | ApiStreamEvent::MessageStop
            | ApiStreamEvent::Unknown => Vec::new(),
        }
    }

    fn mark_streamed(&mut self) {
        self.current_message_streamed = true;
        if let Some(id) = &self.current_message {
            self.streamed_messages.insert(id.clone());
        }
    }

    fn finish_tool(&mut self, pending: PendingToolUse) -> Vec<StreamEvent> {
        self.mark_streamed();
        self.streamed_tools.insert(pending.id);
        let payload = if pending.partial_json.trim().is_empty() {
            pending.initial_input
        } else {
            match serde_json::from_str(&pending.partial_json) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(tool = %pending.name, error = %e, "Unparseable tool input");
                    return vec![StreamEvent::error(
                        ErrorKind::MalformedOutput,
                        pending.partial_json,
                    )];
                }
            }
        };
        vec![StreamEvent::ToolUse {
            name: pending.name,
            payload,
        }]
    }

    fn handle_result(&mut self, result: ResultEvent) -> Vec<StreamEvent> {
        if result.total_cost_usd.is_some() {
            self.cost_usd = result.total_cost_usd;
        }
        let mut events = Vec::with_capacity(2);
        if let Some(usage) = result.usage {
            events.push(StreamEvent::Usage(TokenUsage::from(usage)));
        }
        let terminal = match (result.is_error, result.subtype.as_str()) {
            (_, MAX_TURNS_SUBTYPE) => StreamEvent::Done {
                finish_reason: FinishReason::Length,
            },
            (false, "success") => StreamEvent::done(),
            _ => StreamEvent::error(
                ErrorKind::Upstream,
                result
                    .result
                    .filter(|text| !text.is_empty())
                    .unwrap_or(result.subtype),
            ),
        };
        events.push(terminal);
        events
    }
}
