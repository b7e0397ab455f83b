//! Command-line interface module.
//!
//! Provides subcommands for planning and running batch renames, template
//! validation, single-file analysis, and tool diagnostics.

mod commands;

pub use commands::{run_command, Cli};
