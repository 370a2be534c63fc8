//! CLI module tests.

mod parser_test;
mod process_test;
