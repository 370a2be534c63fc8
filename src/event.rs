//! Protocol-neutral events produced from the Claude Code output stream.
//!
//! Every invocation yields a totally ordered sequence of [`StreamEvent`]s
//! that ends with exactly one terminal event (`Done` or a terminal `Error`).
//! Both the streaming and the aggregated OpenAI encodings are projections of
//! this sequence.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of an error carried by [`StreamEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// One unit of tool output could not be understood. Non-terminal.
    MalformedOutput,
    /// The tool exited unsuccessfully. `exit_code` is `None` when it was
    /// killed by a signal.
    ProcessFailed { exit_code: Option<i32> },
    /// The tool reported a failed run in its own result record.
    Upstream,
    /// The invocation deadline or idle timeout elapsed.
    Timeout,
    /// The caller or the session owner cancelled the invocation.
    Cancelled,
}

impl ErrorKind {
    /// Stable machine-readable code for this kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedOutput => "malformed_output",
            Self::ProcessFailed { .. } => "process_failed",
            Self::Upstream => "upstream_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if an error of this kind ends the invocation.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::MalformedOutput)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessFailed {
                exit_code: Some(code),
            } => write!(f, "process_failed (exit code {code})"),
            other => f.write_str(other.code()),
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    Stop,
    /// The tool hit its turn limit.
    Length,
}

impl FinishReason {
    /// OpenAI wire value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
        }
    }
}

/// Token counts reported by the tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Normalized unit of output from one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta { content: String },
    /// The tool invoked one of its own tools.
    ToolUse {
        name: String,
        payload: serde_json::Value,
    },
    /// Token accounting for the run.
    Usage(TokenUsage),
    /// Something went wrong; terminal unless the kind is `MalformedOutput`.
    Error { kind: ErrorKind, message: String },
    /// Normal completion.
    Done { finish_reason: FinishReason },
}

impl StreamEvent {
    /// Convenience constructor for a text delta.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::TextDelta {
            content: content.into(),
        }
    }

    /// Convenience constructor for an error event.
    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Convenience constructor for a normal stop.
    #[must_use]
    pub fn done() -> Self {
        Self::Done {
            finish_reason: FinishReason::Stop,
        }
    }

    /// Returns true if no further events may follow this one.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Done { .. } => true,
            Self::Error { kind, .. } => kind.is_terminal(),
            _ => false,
        }
    }

    /// Returns the error kind if this is an error event.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
