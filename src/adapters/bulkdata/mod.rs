//! Bulk data export API boundary
//!
//! [`BulkDataClient`] is the seam between the run and a bulk FHIR server:
//! start an export, poll its status, download result files and refresh
//! credentials. [`HttpBulkDataClient`] is the REST implementation; tests plug in
//! scripted fakes.

pub mod client;

use crate::domain::{BulkDataError, ExportGroup, JobStatus, ResourceType, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

pub use client::HttpBulkDataClient;

/// Streaming body of one result file
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Operations the run needs from a bulk data server
///
/// Only `authenticate` takes `&mut self`: it replaces the session credential
/// that every other call reads. Downloads within one run are sequential, so no
/// locking is needed around that credential.
///
/// # Example
///
/// ```no_run
/// use bulkfetch::adapters::bulkdata::{BulkDataClient, HttpBulkDataClient};
/// use bulkfetch::config::ServerConfig;
/// use bulkfetch::domain::{ExportGroup, ResourceType};
///
/// # async fn example(config: ServerConfig) -> bulkfetch::domain::Result<()> {
/// let mut client = HttpBulkDataClient::new(&config)?;
/// client.authenticate().await?;
///
/// let types = vec![ResourceType::new("Patient").unwrap()];
/// let job_url = client.start_export(&types, None, &ExportGroup::All).await?;
/// let status = client.job_status(&job_url).await?;
/// println!("complete: {}", status.is_complete());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait BulkDataClient: Send + Sync {
    /// Obtain a fresh access token and store it in the client
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::BulkFetchError::Authentication`] if the token
    /// endpoint rejects the credentials or cannot be reached.
    async fn authenticate(&mut self) -> Result<()>;

    /// Start an export job and return its status URL
    ///
    /// # Arguments
    ///
    /// * `resource_types` - Resource types to export
    /// * `since` - Only export data changed after this instant
    /// * `group` - Export group
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::BulkFetchError::JobStart`] if the server does
    /// not accept the job.
    async fn start_export(
        &self,
        resource_types: &[ResourceType],
        since: Option<DateTime<Utc>>,
        group: &ExportGroup,
    ) -> Result<String>;

    /// Poll the status of an export job
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::BulkFetchError::StatusPoll`] when the poll
    /// itself fails. A job the server reports as failed is an `Ok` status in
    /// the `Failed` state.
    async fn job_status(&self, job_url: &str) -> Result<JobStatus>;

    /// Open a result file for streaming
    ///
    /// # Errors
    ///
    /// Returns a classified [`BulkDataError`] so callers can decide whether to
    /// re-authenticate and retry.
    async fn download(&self, url: &str) -> std::result::Result<ByteStream, BulkDataError>;
}
