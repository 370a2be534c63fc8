//! API response types for the session endpoints.

use serde::{Deserialize, Serialize};

use crate::session::SessionInfo;

/// Response for GET /v1/sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionList {
    pub object: String,
    pub data: Vec<SessionInfo>,
}

impl SessionList {
    #[must_use]
    pub fn new(data: Vec<SessionInfo>) -> Self {
        Self {
            object: "list".to_string(),
            data,
        }
    }
}

/// Response for DELETE /v1/sessions/:id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDeleted {
    pub id: String,
    pub deleted: bool,
    /// State of the session at termination.
    pub session: SessionInfo,
}

impl SessionDeleted {
    #[must_use]
    pub fn new(session: SessionInfo) -> Self {
        Self {
            id: session.id.clone(),
            deleted: true,
            session,
        }
    }
}
