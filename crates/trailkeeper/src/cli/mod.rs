//! Command-line interface for trailkeeper.
//!
//! This module provides the CLI structure for the `trailkeep` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    parse_coordinate, ConfigCommand, OutputFormat, SharedCommand, TrailsCommand, TracksCommand,
};

/// trailkeep - Inspect and manage recorded trails, tracks and shared locations
///
/// Works against the same local database the recording managers write to.
#[derive(Debug, Parser)]
#[command(name = "trailkeep")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Recorded GPX tracks
    #[command(subcommand)]
    Tracks(TracksCommand),

    /// Breadcrumb trails
    #[command(subcommand)]
    Trails(TrailsCommand),

    /// Live shared locations
    #[command(subcommand)]
    Shared(SharedCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
