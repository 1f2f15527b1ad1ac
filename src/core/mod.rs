//! Core business logic for bulkfetch.
//!
//! # Modules
//!
//! - [`export`] - Run orchestration, NDJSON splitting and the run summary
//! - [`job`] - Export job monitoring and resilient downloads
//! - [`pipeline`] - Processors and sinks
//! - [`state`] - Transaction time (watermark) persistence
//!
//! # Run Workflow
//!
//! 1. **Configure**: validate settings and build the output pipeline
//! 2. **Resolve job**: attach to a pending job, or start one with the stored `_since`
//! 3. **Poll**: wait for the job to complete or time out
//! 4. **Download**: stream every result file through the pipeline
//! 5. **Finalize**: commit every sink
//! 6. **Checkpoint**: store the job's transaction time
//!
//! # Example
//!
//! ```rust,no_run
//! use bulkfetch::config::load_config;
//! use bulkfetch::core::export::FetchCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("bulkfetch.toml")?;
//! let mut coordinator = FetchCoordinator::from_config(config)?;
//!
//! let summary = coordinator.execute().await?;
//! println!("Records: {}", summary.total_records());
//! # Ok(())
//! # }
//! ```

pub mod export;
pub mod job;
pub mod pipeline;
pub mod state;
