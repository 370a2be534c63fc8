//! OpenAI Chat Completions protocol: wire types, model ids, prompt
//! building and the response formatter.

mod formatter;
mod models;
mod prompt;
mod types;

pub use formatter::*;
pub use models::*;
pub use prompt::*;
pub use types::*;
