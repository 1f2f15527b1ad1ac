//! Export job model
//!
//! [`JobStatus`] is one snapshot reported by the bulk data server. [`ExportJob`]
//! is the handle the orchestrator owns for the whole run; it folds snapshots in
//! and freezes once the job is complete.

use crate::domain::ids::ResourceType;
use crate::domain::{BulkFetchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server-side state of an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, not yet started
    #[default]
    Pending,
    /// Being prepared
    InProgress,
    /// Result files are ready
    Complete,
    /// The server gave up on the job
    Failed,
}

impl JobState {
    /// Whether no further status change is expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Result file URLs grouped by resource type, visited in key order
pub type ResultUrls = BTreeMap<ResourceType, Vec<String>>;

/// One status observation of an export job
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobStatus {
    /// Reported state
    pub state: JobState,

    /// Progress percentage, when the server reports one
    pub percent_complete: Option<u8>,

    /// Result file URLs (only populated once complete)
    pub result_urls: ResultUrls,

    /// Snapshot boundary of the export (only populated once complete)
    pub transaction_time: Option<DateTime<Utc>>,

    /// Failure description when `state` is `Failed`
    pub error: Option<String>,
}

impl JobStatus {
    /// A snapshot for a job still being prepared
    pub fn in_progress(percent_complete: Option<u8>) -> Self {
        Self {
            state: JobState::InProgress,
            percent_complete,
            ..Default::default()
        }
    }

    /// A snapshot for a finished job
    pub fn complete(result_urls: ResultUrls, transaction_time: DateTime<Utc>) -> Self {
        Self {
            state: JobState::Complete,
            percent_complete: Some(100),
            result_urls,
            transaction_time: Some(transaction_time),
            error: None,
        }
    }

    /// A snapshot for a job the server abandoned
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Whether the job reached `Complete`
    pub fn is_complete(&self) -> bool {
        self.state == JobState::Complete
    }

    /// Total number of result files across all resource types
    pub fn result_file_count(&self) -> usize {
        self.result_urls.values().map(Vec::len).sum()
    }
}

/// Handle to one export job for the duration of a run
#[derive(Debug, Clone)]
pub struct ExportJob {
    url: String,
    status: JobStatus,
    attached: bool,
}

impl ExportJob {
    /// A job this run started
    pub fn started(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: JobStatus::default(),
            attached: false,
        }
    }

    /// A pre-existing job supplied by the caller
    pub fn attached(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: JobStatus::default(),
            attached: true,
        }
    }

    /// Job status URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the job was supplied rather than started by this run
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Last folded status
    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    /// Whether the job reached `Complete`
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Fold a new snapshot into the handle
    ///
    /// # Errors
    ///
    /// Returns a state error if the job is already complete; a complete job is
    /// immutable.
    pub fn apply(&mut self, status: JobStatus) -> Result<()> {
        if self.status.is_complete() {
            return Err(BulkFetchError::State(format!(
                "export job {} is already complete",
                self.url
            )));
        }
        self.status = status;
        Ok(())
    }
}
