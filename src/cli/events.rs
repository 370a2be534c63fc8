//! Event types from Claude Code stream-json output.
//!
//! This module defines the records Claude Code emits, one JSON object per
//! line, when running in non-interactive mode with
//! `--output-format stream-json --verbose --include-partial-messages`.
//! Only the fields the gateway consumes are modelled; unknown fields are
//! ignored, unknown record types are rejected.

use serde::{Deserialize, Serialize};

use crate::event::TokenUsage;

/// System initialization record data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInit {
    /// Record subtype (e.g., "init").
    #[serde(default)]
    pub subtype: Option<String>,
    /// Claude's own session identifier.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Working directory the tool is running in.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Model the tool resolved.
    #[serde(default)]
    pub model: Option<String>,
    /// Tools available to the run.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Token usage in Anthropic API shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl From<ApiUsage> for TokenUsage {
    fn from(usage: ApiUsage) -> Self {
        Self {
            prompt_tokens: usage
                .input_tokens
                .saturating_add(usage.cache_creation_input_tokens)
                .saturating_add(usage.cache_read_input_tokens),
            completion_tokens: usage.output_tokens,
        }
    }
}

/// A content block inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        #[serde(default)]
        text: String,
    },
    /// A tool invocation.
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Extended thinking, tool results and future block kinds.
    #[serde(other)]
    Other,
}

/// Content delta types for streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text content delta.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// JSON input delta (for tool inputs).
    InputJsonDelta {
        /// Partial JSON string.
        partial_json: String,
    },
    /// Thinking, signatures and other deltas the gateway does not relay.
    #[serde(other)]
    Unknown,
}

/// A complete assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// API message id.
    #[serde(default)]
    pub id: Option<String>,
    /// Content blocks in order.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Per-message usage.
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

/// Anthropic streaming events wrapped in `stream_event` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiStreamEvent {
    /// Message start marker.
    MessageStart {
        /// Message metadata.
        message: serde_json::Value,
    },
    /// Content block start marker.
    ContentBlockStart {
        /// Block index.
        index: usize,
        /// Block metadata.
        content_block: ContentBlock,
    },
    /// Streaming content delta.
    ContentBlockDelta {
        /// Block index.
        index: usize,
        /// Delta content.
        delta: ContentDelta,
    },
    /// Content block end marker.
    ContentBlockStop {
        /// Block index.
        index: usize,
    },
    /// Message-level delta (stop reason, usage).
    MessageDelta {
        #[serde(default)]
        delta: serde_json::Value,
        #[serde(default)]
        usage: Option<ApiUsage>,
    },
    /// Message end marker.
    MessageStop,
    /// Keep-alive and future API events.
    #[serde(other)]
    Unknown,
}

/// Final result record data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Result subtype (e.g., "success", "`error_max_turns`").
    pub subtype: String,
    /// Whether the run failed.
    #[serde(default)]
    pub is_error: bool,
    /// Final text or error description.
    #[serde(default)]
    pub result: Option<String>,
    /// Claude's own session identifier.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Aggregate usage for the run.
    #[serde(default)]
    pub usage: Option<ApiUsage>,
    /// Total cost in USD.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    /// Total duration in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Number of conversation turns.
    #[serde(default)]
    pub num_turns: Option<u32>,
}

/// Records emitted by Claude Code in stream-json format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeEvent {
    /// System initialization record.
    System(SystemInit),
    /// Partial message event (`--include-partial-messages`).
    StreamEvent {
        event: ApiStreamEvent,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Complete assistant message.
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Tool results the CLI feeds back to the model.
    User {
        #[serde(default)]
        message: serde_json::Value,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Final result record.
    Result(ResultEvent),
}

impl ClaudeEvent {
    /// Returns true if this is a terminal record (Result).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// Returns the Claude session ID if the record carries one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System(init) => init.session_id.as_deref(),
            Self::Result(result) => result.session_id.as_deref(),
            Self::StreamEvent { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::User { session_id, .. } => session_id.as_deref(),
        }
    }
}
