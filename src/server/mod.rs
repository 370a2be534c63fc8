//! HTTP surface: axum routes over the gateway.

mod api;
mod error;
mod handlers;
#[allow(clippy::module_inception)]
mod server;

pub use api::{SessionDeleted, SessionList};
pub use error::ServerError;
pub use handlers::AppState;
pub use server::GatewayServer;
