//! Command handlers.
//!
//! Each handler takes the resolved [`CliContext`](crate::bootstrap::CliContext),
//! calls into the library crates, and formats the result for the terminal.
//! Business logic stays in the libraries.

pub mod download;
pub mod maintenance;
pub mod status;
