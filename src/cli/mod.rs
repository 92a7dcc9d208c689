//! Command-line interface
//!
//! `main.rs` parses arguments and dispatches here; subsystems are only
//! ever reached through `run_command`.

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::run_command;
pub use errors::CliError;
