//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Run command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Exit with an error on a fatal startup failure instead of halting
    #[arg(long)]
    pub exit_on_fatal: bool,
}

/// Files command arguments.
#[derive(Debug, Args)]
pub struct FilesCommand {
    /// Directory to list (defaults to the configured storage root)
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Output the top-level entries as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Decode command arguments.
#[derive(Debug, Args)]
pub struct DecodeCommand {
    /// Data file to decode (defaults to the configured data file)
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
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

/// Output format for decoded records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One aligned row per record
    #[default]
    Plain,
    /// One JSON object per line
    Json,
    /// Re-encoded line protocol
    Line,
}
