//! External system integrations for bulkfetch.
//!
//! - [`bulkdata`] - Bulk FHIR export server (job start, status, downloads)
//! - [`gcs`] - Cloud Storage objects (remote checkpoint, import staging)
//! - [`ndjson`] - Local NDJSON file sink
//! - [`fhirstore`] - Healthcare API FHIR store sink
//! - [`postgresql`] - PostgreSQL JSONB sink
//!
//! The bulk data client sits behind the [`bulkdata::BulkDataClient`] trait so
//! the orchestrator can be driven by an in-process fake in tests. Sinks
//! implement [`crate::core::pipeline::Sink`].
//!
//! ```rust,no_run
//! use bulkfetch::adapters::bulkdata::{BulkDataClient, HttpBulkDataClient};
//! use bulkfetch::config::ServerConfig;
//!
//! # async fn example(config: &ServerConfig) -> bulkfetch::domain::Result<()> {
//! let mut client = HttpBulkDataClient::new(config)?;
//! client.authenticate().await?;
//! # Ok(())
//! # }
//! ```

pub mod bulkdata;
pub mod fhirstore;
pub mod gcs;
pub mod ndjson;
pub mod postgresql;
