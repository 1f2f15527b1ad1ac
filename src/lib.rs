//! # bulkfetch - incremental bulk FHIR export fetcher
//!
//! bulkfetch starts (or attaches to) an asynchronous bulk FHIR `$export` job,
//! waits for it to complete, streams every NDJSON result file through a
//! pipeline of processors and sinks, and then records the job's transaction
//! time so the next run only asks for newer data.
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Run orchestration, job monitoring, downloads, pipeline, checkpoint
//! - [`adapters`] - Bulk data server, Cloud Storage, NDJSON, FHIR store, PostgreSQL
//! - [`domain`] - Core domain types and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulkfetch::config::load_config;
//! use bulkfetch::core::export::FetchCoordinator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("bulkfetch.toml")?;
//!     let mut coordinator = FetchCoordinator::from_config(config)?;
//!
//!     let summary = coordinator.execute().await?;
//!     println!("Fetched {} records", summary.total_records());
//!     Ok(())
//! }
//! ```
//!
//! ## Checkpoint ordering
//!
//! The watermark is written after every sink has finalized. A run that fails
//! anywhere before that leaves the watermark untouched, so the next run asks
//! for the same window again. Sinks must therefore tolerate duplicates; the
//! FHIR store and PostgreSQL sinks upsert by resource id.
//!
//! ## Error Handling
//!
//! Library code returns [`domain::Result`] with a [`domain::BulkFetchError`];
//! the binary maps errors onto exit codes (see [`cli::exit_code`]).

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
