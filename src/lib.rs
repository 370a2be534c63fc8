//! Claude Code Gateway - OpenAI-compatible chat completions over the Claude CLI.

pub mod cli;
pub mod config;
pub mod event;
pub mod gateway;
pub mod openai;
pub mod server;
pub mod session;
pub mod supervisor;
