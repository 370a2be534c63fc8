//! Session error types.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur during session operations.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// The session id is already bound to a different working directory.
    #[error("Session {id} is bound to {}, not {}", .bound.display(), .requested.display())]
    Conflict {
        id: String,
        bound: PathBuf,
        requested: PathBuf,
    },

    /// Another invocation held the session for the whole wait.
    #[error("Session {id} still busy after {waited:?}")]
    Busy { id: String, waited: Duration },

    /// The session was terminated or evicted.
    #[error("Session terminated: {0}")]
    Terminated(String),

    /// Session not found.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The id cannot name a directory under the project root.
    #[error("Invalid session id: {0:?}")]
    InvalidId(String),
}
