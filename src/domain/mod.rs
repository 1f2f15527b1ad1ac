//! Domain models and types for bulkfetch.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`ResourceType`], [`ExportGroup`])
//! - **Export job model** ([`JobStatus`], [`ExportJob`])
//! - **Records** flowing through the pipeline ([`Record`])
//! - **The run watermark** ([`TransactionTime`]) and FHIR instant helpers
//! - **Error types** ([`BulkFetchError`], [`BulkDataError`], [`FetchError`])
//! - **Result type alias** ([`Result`])
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, BulkFetchError>`]:
//!
//! ```rust
//! use bulkfetch::domain::{BulkFetchError, Result};
//! use bulkfetch::domain::instant::parse_instant;
//!
//! fn since() -> Result<()> {
//!     let _ts = parse_instant("2021-05-01T00:00:00.000+00:00")?;
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod ids;
pub mod instant;
pub mod job;
pub mod record;
pub mod result;
pub mod transaction_time;

// Re-export commonly used types for convenience
pub use errors::{BulkDataError, BulkFetchError, FetchError, SinkFailure};
pub use ids::{ExportGroup, ResourceType};
pub use job::{ExportJob, JobState, JobStatus, ResultUrls};
pub use record::Record;
pub use result::Result;
pub use transaction_time::TransactionTime;
