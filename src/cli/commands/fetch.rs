//! Fetch command implementation
//!
//! This module implements the `fetch` command: one incremental run from the
//! bulk data server into the configured outputs.

use crate::cli::{exit_code, EXIT_SUCCESS};
use crate::config::loader::parse_config_file;
use crate::config::BulkFetchConfig;
use crate::core::export::{FetchCoordinator, RunSummary};
use crate::domain::instant::format_instant;
use clap::Args;

/// Arguments for the fetch command
#[derive(Args, Debug, Default)]
pub struct FetchArgs {
    /// Fetch only data changed after this FHIR instant (single run, not persisted)
    #[arg(long)]
    pub since: Option<String>,

    /// Watermark log to read and append (local path or gs://bucket/object)
    #[arg(long)]
    pub since_file: Option<String>,

    /// Attach to an existing export job instead of starting one
    #[arg(long)]
    pub pending_job_url: Option<String>,

    /// Write NDJSON files as {prefix}{ResourceType}.ndjson
    #[arg(long)]
    pub output_prefix: Option<String>,
}

impl FetchArgs {
    /// Apply command line overrides to a parsed configuration
    pub fn apply_overrides(&self, config: &mut BulkFetchConfig) {
        if let Some(ref since) = self.since {
            tracing::info!(since = %since, "Overriding checkpoint.since from CLI");
            config.checkpoint.since = Some(since.clone());
        }
        if let Some(ref since_file) = self.since_file {
            tracing::info!(since_file = %since_file, "Overriding checkpoint.since_file from CLI");
            config.checkpoint.since_file = Some(since_file.clone());
        }
        if let Some(ref url) = self.pending_job_url {
            tracing::info!(job_url = %url, "Overriding server.pending_job_url from CLI");
            config.server.pending_job_url = Some(url.clone());
        }
        if let Some(ref prefix) = self.output_prefix {
            tracing::info!(output_prefix = %prefix, "Overriding output.output_prefix from CLI");
            config.output.output_prefix = Some(prefix.clone());
        }
    }

    /// Execute the fetch command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Starting fetch command");

        let mut config = match parse_config_file(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(exit_code(&e));
            }
        };
        self.apply_overrides(&mut config);

        let mut coordinator = match FetchCoordinator::from_config(config) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize fetch");
                eprintln!("Failed to initialize fetch: {e}");
                return Ok(exit_code(&e));
            }
        };

        println!("Starting fetch...");
        let summary = match coordinator.execute().await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Fetch failed: {e}");
                return Ok(exit_code(&e));
            }
        };

        print_summary(&summary);
        Ok(EXIT_SUCCESS)
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Fetch Summary:");
    println!(
        "  Job: {}{}",
        summary.job_url.as_deref().unwrap_or("-"),
        if summary.attached_job { " (attached)" } else { "" }
    );
    println!(
        "  Since: {}",
        summary
            .since
            .as_ref()
            .map(format_instant)
            .unwrap_or_else(|| "(everything)".to_string())
    );
    println!(
        "  Transaction time: {}",
        summary
            .transaction_time
            .as_ref()
            .map(format_instant)
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  Files fetched: {}", summary.urls_fetched);
    for (resource_type, count) in &summary.records {
        println!("  {resource_type}: {count} records");
    }
    println!("  Total records: {}", summary.total_records());
    println!("  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.has_warnings() {
        println!();
        println!("Warnings:");
        for warning in &summary.warnings {
            println!("  - {}: {}", warning.sink, warning.message);
        }
    }

    println!();
    if summary.checkpoint_committed {
        println!("Fetch completed, checkpoint advanced.");
    } else {
        println!("Fetch completed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_args_defaults() {
        let args = FetchArgs::default();
        let mut config = BulkFetchConfig::default();
        let before = config.checkpoint.clone();
        args.apply_overrides(&mut config);

        assert_eq!(config.checkpoint.since, before.since);
        assert!(config.output.output_prefix.is_none());
    }

    #[test]
    fn test_fetch_args_with_overrides() {
        let args = FetchArgs {
            since: None,
            since_file: Some("since.txt".to_string()),
            pending_job_url: Some("https://bulk.example.com/jobs/42".to_string()),
            output_prefix: Some("out/".to_string()),
        };
        let mut config = BulkFetchConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.checkpoint.since_file.as_deref(), Some("since.txt"));
        assert_eq!(
            config.server.pending_job_url.as_deref(),
            Some("https://bulk.example.com/jobs/42")
        );
        assert_eq!(config.output.output_prefix.as_deref(), Some("out/"));
    }
}
