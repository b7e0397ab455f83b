//! Track Renamer - metadata-driven batch renaming for music files.
//!
//! Resolves each file's metadata from embedded tags, acoustic fingerprint
//! lookups, and local feature analysis, then renames files from a
//! user-supplied template. Every rename runs as a cancellable operation
//! with a time-boxed undo window.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod ops;
pub mod planner;
pub mod resolver;
pub mod service;
pub mod template;
#[cfg(test)]
pub mod test_utils;
pub mod undo;

use clap::{CommandFactory, Parser};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("track_renamer=info".parse()?))
        .init();

    if cli::run_command(&args)? {
        return Ok(());
    }

    // No command specified
    cli::Cli::command().print_help()?;
    Ok(())
}
