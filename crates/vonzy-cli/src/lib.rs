//! Vonzy CLI library.
//!
//! The binary in `main.rs` only parses arguments; the command implementations
//! live here so integration tests can drive them directly.

pub mod commands;
pub mod prompt;
