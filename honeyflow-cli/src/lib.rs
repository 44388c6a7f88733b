//! Library half of the `honeyflow` command-line tool.
//!
//! The binary in `main.rs` only parses arguments and dispatches; everything
//! else lives here so integration tests can drive it.

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod output;
