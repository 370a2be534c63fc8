//! Request pipeline from an OpenAI chat request to an invocation.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use super::error::GatewayError;
use crate::openai::{
    to_chunks, to_result, ChatCompletionRequest, ChatCompletionResult, CompletionContext, ModelCard,
    Prompt, StreamFrame, SupportedModel,
};
use crate::session::{Session, SessionError, SessionInfo, SessionRegistry, SessionStats};
use crate::supervisor::{Invocation, ProcessSupervisor, SupervisorOptions};

/// How long the health check waits for `claude --version`.
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Response for GET /health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// "ok", or "degraded" when the Claude binary cannot be run.
    pub status: String,
    pub active_sessions: usize,
    pub total_sessions: usize,
    pub in_flight_invocations: usize,
    pub max_concurrent_invocations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_version: Option<String>,
}

/// An invocation that has been started, with the identity of its response.
#[derive(Debug)]
pub struct StartedCompletion {
    pub context: CompletionContext,
    pub invocation: Invocation,
}

/// The gateway: validates requests, resolves sessions and starts
/// invocations.
#[derive(Debug)]
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    supervisor: ProcessSupervisor,
}

impl Gateway {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, options: SupervisorOptions) -> Self {
        let supervisor = ProcessSupervisor::new(Arc::clone(&registry), options);
        Self {
            registry,
            supervisor,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Validate `request` and start its invocation.
    ///
    /// Requests without a session id get a fresh session; its id is echoed
    /// in the response so the caller can continue the conversation.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` for an unknown model, an unusable message
    /// list, a session conflict, or any failure to start the process.
    pub async fn start(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<StartedCompletion, GatewayError> {
        let model: SupportedModel = request.model.parse()?;
        let prompt = Prompt::from_request(request)?;
        let session = self.resolve_session(request)?;

        tracing::debug!(
            session_id = %session.id(),
            %model,
            stream = request.stream,
            messages = request.messages.len(),
            "Starting completion"
        );

        let invocation = self
            .supervisor
            .start(&session, prompt.into_invocation(model.as_str()))
            .await?;
        let context = CompletionContext::new(model.as_str(), Some(session.id().to_string()));
        Ok(StartedCompletion {
            context,
            invocation,
        })
    }

    /// Run `request` to completion and return the aggregated response.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the invocation cannot start or produces
    /// any error event.
    pub async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResult, GatewayError> {
        let started = self.start(request).await?;
        Ok(to_result(started.context, started.invocation).await?)
    }

    /// Start `request` and return its streaming frames.
    ///
    /// Errors after the start are delivered as frames.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the invocation cannot start.
    pub async fn stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<BoxStream<'static, StreamFrame>, GatewayError> {
        let started = self.start(request).await?;
        Ok(to_chunks(started.context, started.invocation).boxed())
    }

    fn resolve_session(&self, request: &ChatCompletionRequest) -> Result<Session, GatewayError> {
        let working_dir = request
            .working_dir
            .as_deref()
            .map(|dir| self.absolute(dir))
            .transpose()?;
        let id = match request.session_key() {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        Ok(self.registry.resolve_or_create(&id, working_dir.as_deref())?)
    }

    /// Absolute paths are taken as given. Relative ones are resolved under
    /// the project root and may not climb out of it.
    fn absolute(&self, dir: &Path) -> Result<PathBuf, GatewayError> {
        if dir.is_absolute() {
            return Ok(dir.to_path_buf());
        }
        if dir
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(GatewayError::InvalidRequest(format!(
                "working_dir {} escapes the project root",
                dir.display()
            )));
        }
        Ok(self.registry.project_root().join(dir))
    }

    /// Snapshot of every session.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    /// Snapshot of one session.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Session` if the session does not exist.
    pub fn session(&self, id: &str) -> Result<SessionInfo, GatewayError> {
        self.registry
            .get(id)
            .map(|session| session.info())
            .ok_or_else(|| SessionError::NotFound(id.to_string()).into())
    }

    /// Token and cost totals across sessions.
    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        self.registry.stats()
    }

    /// Card for one supported model.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ModelNotFound` for any other id.
    pub fn model(&self, id: &str) -> Result<ModelCard, GatewayError> {
        id.parse::<SupportedModel>()
            .map(ModelCard::from)
            .map_err(|_| GatewayError::ModelNotFound(id.to_string()))
    }

    /// Terminate a session and cancel whatever runs on it.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Session` if the session does not exist.
    pub fn terminate_session(&self, id: &str) -> Result<SessionInfo, GatewayError> {
        Ok(self.registry.terminate(id)?)
    }

    /// Current load and whether the Claude binary is usable.
    pub async fn health(&self) -> HealthStatus {
        let version = match tokio::time::timeout(VERSION_TIMEOUT, self.supervisor.version()).await {
            Ok(Ok(version)) => Some(version),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Claude binary unavailable");
                None
            }
            Err(_) => {
                tracing::warn!("Timed out querying Claude version");
                None
            }
        };
        HealthStatus {
            status: if version.is_some() { "ok" } else { "degraded" }.to_string(),
            active_sessions: self.registry.active_count(),
            total_sessions: self.registry.len(),
            in_flight_invocations: self.supervisor.in_flight(),
            max_concurrent_invocations: self.supervisor.max_concurrent(),
            claude_version: version,
        }
    }
}
