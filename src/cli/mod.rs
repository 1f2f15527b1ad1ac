//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for bulkfetch using clap.

pub mod commands;

use crate::domain::BulkFetchError;
use clap::{Parser, Subcommand};

/// Exit code for a successful command
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for configuration errors
pub const EXIT_CONFIG: i32 = 2;

/// Exit code for initialization and connection errors
pub const EXIT_CONNECTION: i32 = 4;

/// Exit code for fatal run errors
pub const EXIT_FATAL: i32 = 5;

/// bulkfetch - incremental bulk FHIR export fetcher
#[derive(Parser, Debug)]
#[command(name = "bulkfetch")]
#[command(version, about, long_about = None)]
#[command(author = "Bulkfetch Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "bulkfetch.toml", env = "BULKFETCH_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "BULKFETCH_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one incremental fetch
    Fetch(commands::fetch::FetchArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Show the watermark the next fetch would use
    Status(commands::status::StatusArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

/// Process exit code for an error
pub fn exit_code(error: &BulkFetchError) -> i32 {
    match error {
        BulkFetchError::Configuration(_) | BulkFetchError::InvalidWatermark(_) => EXIT_CONFIG,
        BulkFetchError::Authentication(_) | BulkFetchError::Connection(_) => EXIT_CONNECTION,
        _ => EXIT_FATAL,
    }
}
