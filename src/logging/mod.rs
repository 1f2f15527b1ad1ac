//! Logging and observability
//!
//! Structured logging through `tracing`, with:
//! - Configurable log levels (`--log-level`, `[application] log_level`, `RUST_LOG`)
//! - Optional JSON console output
//! - Local JSON file logging with rotation
//!
//! # Example
//!
//! ```no_run
//! use bulkfetch::logging::init_logging;
//! use bulkfetch::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(job_url = "https://bulk.example.com/jobs/1", "Export job started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use bulkfetch::log_retry_attempt;
///
/// log_retry_attempt!("https://bulk.example.com/1.ndjson", 2, 5, "unauthorized");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($url:expr, $attempt:expr, $max_retries:expr, $reason:expr) => {
        tracing::warn!(
            url = %$url,
            attempt = $attempt,
            max_retries = $max_retries,
            reason = %$reason,
            "Download failed, re-authenticating and retrying"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use bulkfetch::log_error_with_context;
/// use bulkfetch::domain::BulkFetchError;
///
/// let error = BulkFetchError::Configuration("missing client_id".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}
