//! Run summary and reporting
//!
//! This module defines the summary of one fetch run.

use crate::core::export::RunState;
use crate::domain::instant::format_instant;
use crate::domain::{ResourceType, SinkFailure};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Summary of a fetch run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Export job status URL
    pub job_url: Option<String>,

    /// Whether the job was attached rather than started
    pub attached_job: bool,

    /// Watermark used to request the export
    pub since: Option<DateTime<Utc>>,

    /// Transaction time of the completed export
    pub transaction_time: Option<DateTime<Utc>>,

    /// Result files fully processed
    pub urls_fetched: usize,

    /// Records submitted per resource type
    pub records: BTreeMap<ResourceType, usize>,

    /// Tolerated sink errors
    pub warnings: Vec<SinkFailure>,

    /// Whether the checkpoint was advanced
    pub checkpoint_committed: bool,

    /// Final orchestrator state
    pub final_state: RunState,

    /// Duration of the run
    pub duration: Duration,
}

impl RunSummary {
    /// Create a new empty summary
    pub fn new() -> Self {
        Self {
            job_url: None,
            attached_job: false,
            since: None,
            transaction_time: None,
            urls_fetched: 0,
            records: BTreeMap::new(),
            warnings: Vec::new(),
            checkpoint_committed: false,
            final_state: RunState::Configuring,
            duration: Duration::from_secs(0),
        }
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Total records across all resource types
    pub fn total_records(&self) -> usize {
        self.records.values().sum()
    }

    /// Whether the run reached `Done`
    pub fn is_successful(&self) -> bool {
        self.final_state == RunState::Done
    }

    /// Whether sink errors were tolerated during the run
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            job_url = self.job_url.as_deref().unwrap_or("-"),
            transaction_time = %self
                .transaction_time
                .as_ref()
                .map(format_instant)
                .unwrap_or_else(|| "-".to_string()),
            urls_fetched = self.urls_fetched,
            total_records = self.total_records(),
            warnings = self.warnings.len(),
            checkpoint_committed = self.checkpoint_committed,
            duration_ms = self.duration.as_millis() as u64,
            state = %self.final_state,
            "Fetch run summary"
        );

        for (resource_type, count) in &self.records {
            tracing::info!(resource_type = %resource_type, records = count, "Records processed");
        }

        for warning in &self.warnings {
            tracing::warn!(sink = %warning.sink, error = %warning.message, "Tolerated sink error");
        }
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_summary() {
        let summary = RunSummary::new();
        assert_eq!(summary.total_records(), 0);
        assert!(!summary.is_successful());
        assert!(!summary.has_warnings());
    }

    #[test]
    fn test_total_records() {
        let mut summary = RunSummary::new();
        summary.records.insert(ResourceType::new("Patient").unwrap(), 3);
        summary.records.insert(ResourceType::new("Coverage").unwrap(), 4);
        assert_eq!(summary.total_records(), 7);
    }

    #[test]
    fn test_done_is_successful() {
        let mut summary = RunSummary::new().with_duration(Duration::from_secs(3));
        summary.final_state = RunState::Done;
        assert!(summary.is_successful());
        assert_eq!(summary.duration, Duration::from_secs(3));
    }
}
