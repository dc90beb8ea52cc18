//! Defines the command-line arguments and subcommands for the charts-lint
//! CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "charts-lint",
    version,
    about = "Validator for Axibase Charts dashboard configurations."
)]
pub struct ChartsArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate configuration files and print their diagnostics.
    Validate {
        /// A configuration file, or a directory scanned recursively for
        /// `.config` files.
        #[arg(required = true)]
        path: PathBuf,
        /// Output format for diagnostics.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Load setting descriptors from a JSON catalog file instead of
        /// the built-in catalog.
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Fail the exit status on warnings as well as errors.
        #[arg(long)]
        strict: bool,
    },
    /// List every known setting with its declared type.
    ListSettings {
        /// Load setting descriptors from a JSON catalog file instead of
        /// the built-in catalog.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One `file:line:column severity message` row per diagnostic.
    Text,
    /// Full annotated source snippets.
    Pretty,
    /// The editor-protocol diagnostic records as a JSON array.
    Json,
}
