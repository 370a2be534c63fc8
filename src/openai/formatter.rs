//! Projections of a [`StreamEvent`] sequence onto the OpenAI protocol.
//!
//! [`ChunkEncoder`] and [`ResultAggregator`] are pure state machines fed one
//! event at a time; [`to_chunks`] and [`to_result`] drive them from a stream.

use std::collections::VecDeque;

use chrono::Utc;
use futures_core::Stream;
use futures_util::StreamExt;

use super::types::{
    ChatCompletionChunk, ChatCompletionResult, Choice, ChunkChoice, ChunkDelta, ErrorResponse,
    ResponseMessage, Role, ToolUseRecord, Usage,
};
use crate::event::{ErrorKind, FinishReason, StreamEvent, TokenUsage};

/// Identity shared by every chunk of one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionContext {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub session_id: Option<String>,
}

impl CompletionContext {
    /// Fresh context with a `chatcmpl-` id and the current time.
    #[must_use]
    pub fn new(model: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: Utc::now().timestamp(),
            model: model.into(),
            session_id,
        }
    }
}

/// A failed completion.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CompletionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CompletionError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// OpenAI error envelope for this error.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        let kind = match self.kind {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::MalformedOutput | ErrorKind::ProcessFailed { .. } | ErrorKind::Upstream => {
                "server_error"
            }
        };
        ErrorResponse::new(self.message.clone(), kind, self.kind.code())
    }
}

/// One unit of the streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Chunk(ChatCompletionChunk),
    Error(ErrorResponse),
    /// The `[DONE]` end-of-stream marker.
    Done,
}

/// Encodes events as chunks with one chunk of lookahead, so the last content
/// chunk can carry `finish_reason` and usage.
#[derive(Debug)]
pub struct ChunkEncoder {
    ctx: CompletionContext,
    pending: Option<ChatCompletionChunk>,
    next_index: u64,
    usage: Option<TokenUsage>,
    finished: bool,
}

impl ChunkEncoder {
    #[must_use]
    pub fn new(ctx: CompletionContext) -> Self {
        Self {
            ctx,
            pending: None,
            next_index: 0,
            usage: None,
            finished: false,
        }
    }

    /// Returns true once the end-of-stream marker was produced.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one event, returning the frames that became final.
    pub fn push(&mut self, event: StreamEvent) -> Vec<StreamFrame> {
        if self.finished {
            return Vec::new();
        }
        match event {
            StreamEvent::TextDelta { content } => {
                if content.is_empty() {
                    return Vec::new();
                }
                self.replace_pending(ChunkDelta {
                    content: Some(content),
                    ..ChunkDelta::default()
                })
            }
            StreamEvent::ToolUse { name, payload } => self.replace_pending(ChunkDelta {
                tool_use: Some(ToolUseRecord {
                    name,
                    input: payload,
                }),
                ..ChunkDelta::default()
            }),
            StreamEvent::Usage(usage) => {
                self.usage = Some(usage);
                Vec::new()
            }
            StreamEvent::Error { kind, message } => {
                let mut frames: Vec<StreamFrame> =
                    self.pending.take().map(StreamFrame::Chunk).into_iter().collect();
                frames.push(StreamFrame::Error(
                    CompletionError::new(kind, message).to_response(),
                ));
                if kind.is_terminal() {
                    self.finished = true;
                    frames.push(StreamFrame::Done);
                }
                frames
            }
            StreamEvent::Done { finish_reason } => self.close(finish_reason),
        }
    }

    /// End of input without a terminal event; treated as a normal stop.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        if self.finished {
            return Vec::new();
        }
        self.close(FinishReason::Stop)
    }

    fn close(&mut self, finish_reason: FinishReason) -> Vec<StreamFrame> {
        let mut last = match self.pending.take() {
            Some(chunk) => chunk,
            None => self.chunk(ChunkDelta::default()),
        };
        if let Some(choice) = last.choices.first_mut() {
            choice.finish_reason = Some(finish_reason);
        }
        last.usage = self.usage.map(Usage::from);
        self.finished = true;
        vec![StreamFrame::Chunk(last), StreamFrame::Done]
    }

    fn replace_pending(&mut self, delta: ChunkDelta) -> Vec<StreamFrame> {
        let next = self.chunk(delta);
        self.pending
            .replace(next)
            .map(StreamFrame::Chunk)
            .into_iter()
            .collect()
    }

    fn chunk(&mut self, mut delta: ChunkDelta) -> ChatCompletionChunk {
        let index = self.next_index;
        self.next_index += 1;
        if index == 0 {
            delta.role = Some(Role::Assistant);
        }
        ChatCompletionChunk {
            id: self.ctx.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.ctx.created,
            model: self.ctx.model.clone(),
            index,
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
            session_id: self.ctx.session_id.clone(),
        }
    }
}

/// Folds events into one aggregated completion.
#[derive(Debug)]
pub struct ResultAggregator {
    ctx: CompletionContext,
    content: String,
    tool_uses: Vec<ToolUseRecord>,
    usage: Option<TokenUsage>,
    error: Option<CompletionError>,
    finish_reason: Option<FinishReason>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new(ctx: CompletionContext) -> Self {
        Self {
            ctx,
            content: String::new(),
            tool_uses: Vec::new(),
            usage: None,
            error: None,
            finish_reason: None,
        }
    }

    /// Feed one event. Returns true once a terminal event has been seen.
    pub fn push(&mut self, event: StreamEvent) -> bool {
        if self.is_finished() {
            return true;
        }
        match event {
            StreamEvent::TextDelta { content } => self.content.push_str(&content),
            StreamEvent::ToolUse { name, payload } => self.tool_uses.push(ToolUseRecord {
                name,
                input: payload,
            }),
            StreamEvent::Usage(usage) => self.usage = Some(usage),
            StreamEvent::Error { kind, message } => {
                // The first error is reported; a later terminal one only ends input.
                if self.error.is_none() {
                    self.error = Some(CompletionError::new(kind, message));
                }
                if kind.is_terminal() {
                    self.finish_reason = Some(FinishReason::Stop);
                }
            }
            StreamEvent::Done { finish_reason } => self.finish_reason = Some(finish_reason),
        }
        self.is_finished()
    }

    fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Final result, or the first error seen.
    ///
    /// # Errors
    ///
    /// Returns `CompletionError` if any error event was pushed.
    pub fn finish(self) -> Result<ChatCompletionResult, CompletionError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(ChatCompletionResult {
            id: self.ctx.id,
            object: "chat.completion".to_string(),
            created: self.ctx.created,
            model: self.ctx.model,
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: Role::Assistant,
                    content: self.content,
                },
                finish_reason: Some(self.finish_reason.unwrap_or(FinishReason::Stop)),
            }],
            usage: self.usage.map(Usage::from),
            session_id: self.ctx.session_id,
            tool_uses: self.tool_uses,
        })
    }
}

/// Streaming projection of `events`.
///
/// Stops polling `events` once the end-of-stream marker is produced, so
/// dropping the returned stream drops the source as well.
pub fn to_chunks<S>(ctx: CompletionContext, events: S) -> impl Stream<Item = StreamFrame> + Send
where
    S: Stream<Item = StreamEvent> + Unpin + Send,
{
    let encoder = ChunkEncoder::new(ctx);
    futures_util::stream::unfold(
        (events, encoder, VecDeque::new()),
        |(mut events, mut encoder, mut queue)| async move {
            loop {
                if let Some(frame) = queue.pop_front() {
                    return Some((frame, (events, encoder, queue)));
                }
                if encoder.is_finished() {
                    return None;
                }
                match events.next().await {
                    Some(event) => queue.extend(encoder.push(event)),
                    None => queue.extend(encoder.finish()),
                }
            }
        },
    )
}

/// Aggregated projection of `events`.
///
/// # Errors
///
/// Returns `CompletionError` if the sequence contains any error event.
pub async fn to_result<S>(
    ctx: CompletionContext,
    mut events: S,
) -> Result<ChatCompletionResult, CompletionError>
where
    S: Stream<Item = StreamEvent> + Unpin,
{
    let mut aggregator = ResultAggregator::new(ctx);
    while let Some(event) = events.next().await {
        if aggregator.push(event) {
            break;
        }
    }
    aggregator.finish()
}
