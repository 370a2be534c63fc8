//! Turning chat messages into a Claude Code prompt.
//!
//! The CLI takes one prompt and an optional system prompt per run. System
//! messages become the system prompt. A fresh conversation with a single
//! user message is passed verbatim; longer histories are rendered as a
//! role-labelled transcript. When the session can be resumed, the CLI
//! already holds the history and only the last user message is sent.

use super::types::{ChatCompletionRequest, ChatMessage, Role};
use crate::supervisor::InvocationRequest;

/// Error type for prompt construction.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("messages must not be empty")]
    NoMessages,
    #[error("messages must contain at least one user message")]
    NoUserMessage,
}

/// Prompt material for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Prompt for a run without a continuation token.
    pub full: String,
    /// Last user message, sent when resuming.
    pub last_user: String,
    pub system: Option<String>,
}

impl Prompt {
    /// Build the prompt for `request`.
    ///
    /// # Errors
    ///
    /// Returns `PromptError` if there are no messages or no user message.
    pub fn from_request(request: &ChatCompletionRequest) -> Result<Self, PromptError> {
        if request.messages.is_empty() {
            return Err(PromptError::NoMessages);
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(ChatMessage::text)
            .ok_or(PromptError::NoUserMessage)?;

        let system_parts: Vec<String> = request
            .system_prompt
            .iter()
            .cloned()
            .chain(
                request
                    .messages
                    .iter()
                    .filter(|message| message.role == Role::System)
                    .map(ChatMessage::text),
            )
            .filter(|text| !text.trim().is_empty())
            .collect();
        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));

        let conversation: Vec<&ChatMessage> = request
            .messages
            .iter()
            .filter(|message| message.role != Role::System)
            .collect();
        let full = match conversation.as_slice() {
            [only] if only.role == Role::User => only.text(),
            messages => render_transcript(messages),
        };

        Ok(Self {
            full,
            last_user,
            system,
        })
    }

    /// Invocation request for `model`.
    #[must_use]
    pub fn into_invocation(self, model: impl Into<String>) -> InvocationRequest {
        InvocationRequest {
            model: model.into(),
            prompt: self.full,
            resume_prompt: Some(self.last_user),
            system_prompt: self.system,
        }
    }
}

fn render_transcript(messages: &[&ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.label(), message.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
