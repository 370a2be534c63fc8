//! Process supervision: one Claude Code subprocess per in-flight request.

mod invocation;
mod runner;

pub use invocation::*;
pub use runner::*;
