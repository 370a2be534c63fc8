//! Gateway error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::cli::SpawnError;
use crate::event::ErrorKind;
use crate::openai::{CompletionError, ErrorResponse, PromptError, UnsupportedModel};
use crate::session::SessionError;
use crate::supervisor::SupervisorError;

/// Non-standard status used for requests the client abandoned.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Errors surfaced to API callers.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    UnsupportedModel(#[from] UnsupportedModel),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Model {0} not found")]
    ModelNotFound(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl From<PromptError> for GatewayError {
    fn from(err: PromptError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl GatewayError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedModel(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::Session(err) | Self::Supervisor(SupervisorError::Session(err)) => {
                session_status(err)
            }
            Self::Supervisor(SupervisorError::CapacityExceeded { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Supervisor(SupervisorError::SessionTerminated(_)) => StatusCode::GONE,
            Self::Supervisor(SupervisorError::Spawn(_) | SupervisorError::NoStdout) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Completion(err) => match err.kind {
                ErrorKind::MalformedOutput | ErrorKind::ProcessFailed { .. } | ErrorKind::Upstream => {
                    StatusCode::BAD_GATEWAY
                }
                ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            },
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedModel(_) => "unsupported_model",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ModelNotFound(_) => "model_not_found",
            Self::Session(err) | Self::Supervisor(SupervisorError::Session(err)) => {
                session_code(err)
            }
            Self::Supervisor(SupervisorError::CapacityExceeded { .. }) => "capacity_exceeded",
            Self::Supervisor(SupervisorError::SessionTerminated(_)) => "session_terminated",
            Self::Supervisor(SupervisorError::Spawn(SpawnError::NotFound(_))) => "binary_not_found",
            Self::Supervisor(SupervisorError::Spawn(_) | SupervisorError::NoStdout) => "spawn_error",
            Self::Completion(err) => err.kind.code(),
        }
    }

    /// OpenAI error envelope for this error.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        if let Self::Completion(err) = self {
            return err.to_response();
        }
        let status = self.status_code();
        let kind = if status.is_client_error() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                "rate_limit_error"
            } else {
                "invalid_request_error"
            }
        } else {
            "server_error"
        };
        ErrorResponse::new(self.to_string(), kind, self.code())
    }
}

fn session_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::Conflict { .. } => StatusCode::CONFLICT,
        SessionError::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
        SessionError::Terminated(_) => StatusCode::GONE,
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::InvalidId(_) => StatusCode::BAD_REQUEST,
    }
}

fn session_code(err: &SessionError) -> &'static str {
    match err {
        SessionError::Conflict { .. } => "session_conflict",
        SessionError::Busy { .. } => "session_busy",
        SessionError::Terminated(_) => "session_terminated",
        SessionError::NotFound(_) => "session_not_found",
        SessionError::InvalidId(_) => "invalid_session_id",
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }
        (status, Json(self.to_response())).into_response()
    }
}
