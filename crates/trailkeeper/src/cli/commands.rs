//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Subcommand, ValueEnum};

use crate::geo::Coordinate;

/// Recorded track commands.
#[derive(Debug, Subcommand)]
pub enum TracksCommand {
    /// List stored tracks
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Show one track's statistics
    Show {
        /// Track id
        id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Export a track as GPX
    Export {
        /// Track id
        id: String,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE", conflicts_with = "share")]
        output: Option<PathBuf>,

        /// Save to the export directory and copy into the share outbox
        #[arg(long)]
        share: bool,
    },

    /// Import a GPX file as a new track
    Import {
        /// GPX file to import
        file: PathBuf,
    },

    /// Record a track from a JSON-lines file of position samples
    Replay {
        /// File with one position sample per line
        file: PathBuf,

        /// Name of the recorded track
        #[arg(short, long, default_value = "Replayed Track")]
        name: String,

        /// Description of the recorded track
        #[arg(short, long)]
        description: Option<String>,
    },
}

/// Breadcrumb trail commands.
#[derive(Debug, Subcommand)]
pub enum TrailsCommand {
    /// List stored trails
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Export a trail as GPX
    Export {
        /// Trail id
        id: String,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Delete a trail
    Delete {
        /// Trail id
        id: String,
    },
}

/// Shared location commands.
#[derive(Debug, Subcommand)]
pub enum SharedCommand {
    /// List recently shared locations
    List {
        /// Only show locations near this point
        #[arg(long, value_name = "LAT,LON", value_parser = parse_coordinate)]
        near: Option<Coordinate>,

        /// Radius in miles for --near
        #[arg(long, value_name = "MILES", requires = "near")]
        radius: Option<f64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// JSON output
    Json,
}

/// Parse `LAT,LON` into a coordinate.
///
/// # Errors
///
/// Returns a message if the text is not two comma-separated numbers in range.
pub fn parse_coordinate(text: &str) -> Result<Coordinate, String> {
    let (lat, lon) = text
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got {text:?}"))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("invalid latitude {lat:?}"))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|_| format!("invalid longitude {lon:?}"))?;

    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {lat} out of range"));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(format!("longitude {lon} out of range"));
    }
    Ok(Coordinate::new(lat, lon))
}
