//! Session registry: per-conversation state shared across invocations.

mod error;
mod registry;
mod types;

pub use error::SessionError;
pub use registry::*;
pub use types::*;
