//! Sink capability
//!
//! A sink consumes processed records and commits them on `finalize`. Sinks may
//! buffer or upload in the background, but once `finalize` returns every record
//! passed to `process` must be durably committed (or reported as failed).

use crate::domain::{Record, Result};
use async_trait::async_trait;

/// Destination for processed records
#[async_trait]
pub trait Sink: Send {
    /// Name used in logs, warnings and errors
    fn name(&self) -> &str;

    /// Whether this sink's errors are reported as warnings instead of
    /// failing the run
    ///
    /// Only sinks that keep their own record of rejected data (an upload
    /// error report) may opt in. Defaults to `false`.
    fn tolerates_errors(&self) -> bool {
        false
    }

    /// Accept one record
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::BulkFetchError::Sink`] if the record cannot be
    /// accepted.
    async fn process(&mut self, record: &Record) -> Result<()>;

    /// Commit everything accepted so far and release resources
    ///
    /// Called exactly once, after the last `process`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::BulkFetchError::Sink`] if any accepted record
    /// could not be committed.
    async fn finalize(&mut self) -> Result<()>;
}
