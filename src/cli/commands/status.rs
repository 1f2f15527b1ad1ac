//! Status command implementation
//!
//! This module implements the `status` command, which prints the watermark
//! the next `fetch` would send as `_since`.

use crate::cli::{exit_code, EXIT_CONFIG, EXIT_SUCCESS};
use crate::config::load_config;
use crate::core::state::TransactionTimeStore;
use crate::domain::instant::format_instant;
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking checkpoint status");

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let store = match TransactionTimeStore::from_config(&config) {
            Ok(s) => s,
            Err(e) => {
                println!("Failed to open checkpoint store");
                println!("   Error: {e}");
                return Ok(exit_code(&e));
            }
        };

        println!("Checkpoint: {}", store.describe());
        match store.load().await {
            Ok(Some(since)) => {
                println!("Next fetch requests data since {}", format_instant(&since));
            }
            Ok(None) => {
                println!("No watermark stored; the next fetch requests everything.");
            }
            Err(e) => {
                println!("Failed to read watermark");
                println!("   Error: {e}");
                return Ok(exit_code(&e));
            }
        }

        if let Some(ref job_url) = config.server.pending_job_url {
            println!("Pending job: {job_url}");
        }
        Ok(EXIT_SUCCESS)
    }
}
