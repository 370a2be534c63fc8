//! CLI module for Claude Code process spawning and stream parsing.

mod events;
mod parser;
mod process;

pub use events::*;
pub use parser::*;
pub use process::*;
