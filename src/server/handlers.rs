//! HTTP handlers for the OpenAI-compatible API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::StreamExt;

use super::api::{SessionDeleted, SessionList};
use crate::gateway::{Gateway, GatewayError, HealthStatus};
use crate::openai::{ChatCompletionRequest, ModelCard, ModelList, StreamFrame};
use crate::session::{SessionInfo, SessionStats};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

/// POST /v1/chat/completions - JSON or SSE depending on `stream`.
pub async fn post_chat_completions(
    State(state): State<AppState>,
    body: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return GatewayError::InvalidRequest(rejection.body_text()).into_response(),
    };

    if request.stream {
        match state.gateway.stream(&request).await {
            Ok(frames) => Sse::new(frames.map(frame_to_event))
                .keep_alive(KeepAlive::default())
                .into_response(),
            Err(e) => e.into_response(),
        }
    } else {
        match state.gateway.complete(&request).await {
            Ok(result) => Json(result).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

fn frame_to_event(frame: StreamFrame) -> Result<Event, Infallible> {
    let data = match frame {
        StreamFrame::Chunk(chunk) => serde_json::to_string(&chunk),
        StreamFrame::Error(error) => serde_json::to_string(&error),
        StreamFrame::Done => return Ok(Event::default().data("[DONE]")),
    };
    Ok(match data {
        Ok(data) => Event::default().data(data),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize stream frame");
            Event::default().comment("serialization error")
        }
    })
}

/// GET /v1/models - Supported model ids.
pub async fn get_models() -> Json<ModelList> {
    Json(ModelList::supported())
}

/// GET /v1/models/:model_id - One supported model.
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelCard>, GatewayError> {
    Ok(Json(state.gateway.model(&model_id)?))
}

/// GET /health - Load and backend availability.
pub async fn get_health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.gateway.health().await)
}

/// GET /v1/sessions - Snapshot of every session.
pub async fn get_sessions(State(state): State<AppState>) -> Json<SessionList> {
    Json(SessionList::new(state.gateway.sessions()))
}

/// GET /v1/sessions/:id - Snapshot of one session.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, GatewayError> {
    Ok(Json(state.gateway.session(&id)?))
}

/// GET /v1/sessions/stats - Totals across sessions.
pub async fn get_session_stats(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.gateway.session_stats())
}

/// DELETE /v1/sessions/:id - Terminate a session.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDeleted>, GatewayError> {
    let session = state.gateway.terminate_session(&id)?;
    Ok(Json(SessionDeleted::new(session)))
}
