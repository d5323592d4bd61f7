//! Docket CLI
//!
//! Command-line tools for the files behind Docket collections.
//!
//! # Commands
//!
//! - `inspect` - Display entry counts and file sizes
//! - `verify` - Replay logs strictly and report anything an open would
//!   repair or reject
//! - `dump` - List log entries for debugging

mod commands;
mod scan;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Docket command-line maintenance tools.
#[derive(Parser)]
#[command(name = "docket")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the collection files
    #[arg(global = true, short, long, default_value = ".")]
    path: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display entry counts and file sizes
    Inspect {
        /// Collection name
        name: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Verify log integrity
    Verify {
        /// Collection name
        name: String,

        /// Treat tombstones for unknown entries as errors
        #[arg(short, long)]
        strict: bool,
    },

    /// Dump log entries for debugging
    Dump {
        /// Collection name
        name: String,

        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip entries that start before this byte offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { name, format } => {
            commands::inspect::run(&cli.path, &name, format)?;
        }
        Commands::Verify { name, strict } => {
            commands::verify::run(&cli.path, &name, strict)?;
        }
        Commands::Dump {
            name,
            limit,
            offset,
            format,
        } => {
            commands::dump::run(&cli.path, &name, limit, offset, format)?;
        }
        Commands::Version => {
            println!("Docket CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Docket Core v{}", docket_core::VERSION);
        }
    }

    Ok(())
}
