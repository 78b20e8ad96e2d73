//! Command-line interface for rowtrack.
//!
//! The binary in `main.rs` parses arguments, resolves settings through
//! [`bootstrap`], and dispatches to [`handlers`].

pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;

pub use bootstrap::{CliContext, init_logging};
pub use commands::{Commands, DownloadArgs, KindArg};
pub use error::{CliError, exit_code_for};
pub use parser::Cli;
