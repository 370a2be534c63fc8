//! HTTP server with axum router and graceful shutdown.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::ServerError;
use super::handlers::{
    delete_session, get_health, get_model, get_models, get_session, get_session_stats,
    get_sessions, post_chat_completions, AppState,
};
use crate::config::ServerConfig;
use crate::gateway::Gateway;

/// HTTP front end of the gateway.
pub struct GatewayServer {
    /// Server configuration.
    config: ServerConfig,
    /// Application state shared across handlers.
    state: AppState,
    /// Triggers graceful shutdown.
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a new server with default configuration.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, cancel: CancellationToken) -> Self {
        Self {
            config: ServerConfig::default(),
            state: AppState::new(gateway),
            cancel,
        }
    }

    /// Set the server configuration (builder pattern).
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the configured address as a string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Build the axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/v1/chat/completions", post(post_chat_completions))
            .route("/v1/models", get(get_models))
            .route("/v1/models/:model_id", get(get_model))
            .route("/v1/sessions", get(get_sessions))
            .route("/v1/sessions/stats", get(get_session_stats))
            .route("/v1/sessions/:id", get(get_session).delete(delete_session))
            .route("/health", get(get_health))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors_permissive {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Run the server, binding to the configured address.
    ///
    /// The server runs until the cancellation token is triggered, at which
    /// point it performs a graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::BindError {
                address: addr.clone(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let cancel = self.cancel.clone();
        let app = self.build_router();

        tracing::info!(address = ?listener.local_addr().ok(), "Starting gateway server");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("Gateway server shutting down gracefully");
            })
            .await?;
        Ok(())
    }
}
