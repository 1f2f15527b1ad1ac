//! Domain error types
//!
//! This module defines the error hierarchy for bulkfetch. Every fatal failure of a
//! run maps to one [`BulkFetchError`] variant; errors raised at the bulk data
//! boundary are classified by [`BulkDataError`] so the fetcher can decide whether a
//! download is worth retrying. No variant exposes third-party types.

use std::time::Duration;
use thiserror::Error;

/// Main bulkfetch error type
///
/// This is the primary error type used throughout the application.
#[derive(Debug, Error)]
pub enum BulkFetchError {
    /// Invalid or contradictory configuration, raised before any remote call
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stored or supplied watermark could not be parsed as a timestamp
    #[error("invalid since timestamp: {0}")]
    InvalidWatermark(String),

    /// The export job could not be started
    #[error("Unable to start bulk data export: {0}")]
    JobStart(String),

    /// A single job status poll failed (non-fatal while the monitor runs)
    #[error("Unable to get status of export job {job_url}: {source}")]
    StatusPoll {
        job_url: String,
        #[source]
        source: BulkDataError,
    },

    /// The export job did not complete before the monitor deadline
    #[error("Export job {job_url} did not finish before the timeout of {timeout:?}")]
    JobTimeout { job_url: String, timeout: Duration },

    /// The server reported the export job as failed
    #[error("Export job {job_url} failed: {message}")]
    JobFailed { job_url: String, message: String },

    /// A result file could not be downloaded
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A downloaded record was oversize or malformed
    #[error("Failed to parse record from {url} (resource type {resource_type}): {message}")]
    RecordParse {
        url: String,
        resource_type: String,
        message: String,
    },

    /// A processor rejected a record
    #[error("Processor '{processor}' failed: {message}")]
    Processor { processor: String, message: String },

    /// A sink failed to accept or commit records
    #[error("Sink '{sink}' failed: {message}")]
    Sink { sink: String, message: String },

    /// One or more sinks failed to finalize
    #[error("failed to finalize output pipeline: {}", format_sink_failures(.0))]
    PipelineFinalize(Vec<SinkFailure>),

    /// The checkpoint store could not be read or written
    #[error("Checkpoint store error: {0}")]
    CheckpointStore(String),

    /// Authentication with a remote service failed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network/connection errors outside the download path
    #[error("Connection error: {0}")]
    Connection(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(String),

    /// Object storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Run state errors (illegal transitions, unset transaction time)
    #[error("State error: {0}")]
    State(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

/// Classification of failures reported by the bulk data server
///
/// The fetcher retries `Unauthorized`, `RetryableStatus` and `Transport` after
/// re-authenticating. Everything else fails immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BulkDataError {
    /// 401 from the server
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 429 or 5xx from the server
    #[error("retryable HTTP status {status}: {message}")]
    RetryableStatus { status: u16, message: String },

    /// Connection reset, timeout or similar transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other non-success status
    #[error("unexpected HTTP status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// The server answered with something we could not interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BulkDataError {
    /// Whether a download failing with this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::RetryableStatus { .. } | Self::Transport(_)
        )
    }

    /// Classify an HTTP status code into a boundary error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized(message),
            429 | 500..=599 => Self::RetryableStatus { status, message },
            _ => Self::UnexpectedStatus { status, message },
        }
    }
}

/// A download that failed for good, either immediately or after exhausting retries
#[derive(Debug, Error)]
#[error("Unable to download {url} after {attempts} attempt(s): {source}")]
pub struct FetchError {
    /// Result file URL
    pub url: String,

    /// Number of download attempts made
    pub attempts: usize,

    /// Last underlying error
    #[source]
    pub source: BulkDataError,
}

/// One sink that failed during finalize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    /// Sink name
    pub sink: String,

    /// Error message
    pub message: String,
}

impl SinkFailure {
    /// Creates a new sink failure record
    pub fn new(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

fn format_sink_failures(failures: &[SinkFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.sink, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl BulkFetchError {
    /// Convenience constructor for sink errors
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for processor errors
    pub fn processor(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processor {
            processor: processor.into(),
            message: message.into(),
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for BulkFetchError {
    fn from(err: std::io::Error) -> Self {
        BulkFetchError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for BulkFetchError {
    fn from(err: serde_json::Error) -> Self {
        BulkFetchError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for BulkFetchError {
    fn from(err: toml::de::Error) -> Self {
        BulkFetchError::Configuration(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_configuration_error_display() {
        let err = BulkFetchError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test_case(401, true ; "unauthorized")]
    #[test_case(429, true ; "too many requests")]
    #[test_case(500, true ; "internal error")]
    #[test_case(503, true ; "unavailable")]
    #[test_case(403, false ; "forbidden")]
    #[test_case(404, false ; "not found")]
    fn test_status_classification(status: u16, retryable: bool) {
        let err = BulkDataError::from_status(status, "body");
        assert_eq!(err.is_retryable(), retryable);
        if status == 401 {
            assert!(matches!(err, BulkDataError::Unauthorized(_)));
        }
    }

    #[test]
    fn test_retryable_classes() {
        assert!(BulkDataError::Unauthorized("x".into()).is_retryable());
        assert!(BulkDataError::Transport("reset".into()).is_retryable());
        assert!(!BulkDataError::InvalidResponse("x".into()).is_retryable());
        assert!(!BulkDataError::from_status(403, "forbidden").is_retryable());
    }

    #[test]
    fn test_fetch_error_carries_url_and_cause() {
        let err: BulkFetchError = FetchError {
            url: "https://bulk.example.com/data/1.ndjson".to_string(),
            attempts: 6,
            source: BulkDataError::Unauthorized("token expired".to_string()),
        }
        .into();

        let message = err.to_string();
        assert!(message.contains("https://bulk.example.com/data/1.ndjson"));
        assert!(message.contains("token expired"));
        assert!(message.contains("6 attempt"));
    }

    #[test]
    fn test_pipeline_finalize_lists_every_sink() {
        let err = BulkFetchError::PipelineFinalize(vec![
            SinkFailure::new("ndjson", "disk full"),
            SinkFailure::new("fhir_store", "2 uploads failed"),
        ]);
        let message = err.to_string();
        assert!(message.contains("ndjson: disk full"));
        assert!(message.contains("fhir_store: 2 uploads failed"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: BulkFetchError = io_err.into();
        assert!(matches!(err, BulkFetchError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: BulkFetchError = toml_err.into();
        assert!(matches!(err, BulkFetchError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }
}
