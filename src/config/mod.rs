//! Configuration management for bulkfetch.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! bulkfetch uses TOML configuration files with support for:
//! - Environment variable substitution (`${VAR_NAME}`) and `.env` files
//! - `BULKFETCH_<SECTION>_<KEY>` overrides
//! - Default values for optional settings
//! - Validation of required and mutually exclusive settings before any work starts
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bulkfetch::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("bulkfetch.toml")?;
//!
//! println!("Server: {}", config.server.api_base_url());
//! if let Some(store) = &config.fhir_store {
//!     println!("FHIR store: {}", store.store_path());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level
//! - [`ServerConfig`] - Bulk data server, credentials, resource types, group
//! - [`JobConfig`] - Polling, timeout, backoff and record size bounds
//! - [`CheckpointConfig`] - Watermark source (`since` or `since_file`)
//! - [`OutputConfig`] - NDJSON files, rectification, upload error tolerance
//! - [`FhirStoreConfig`] - Healthcare FHIR store upload
//! - [`GcsConfig`] - Cloud Storage access
//! - [`PostgreSQLConfig`] - PostgreSQL output
//! - [`LoggingConfig`] - Logging configuration
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! client_id = "${BCDA_CLIENT_ID}"
//! client_secret = "${BCDA_CLIENT_SECRET}"
//!
//! [checkpoint]
//! since_file = "gs://my-bucket/bcda_since.txt"
//!
//! [output]
//! output_prefix = "/data/bcda/export_"
//! rectify = true
//!
//! [fhir_store]
//! gcp_project = "my-project"
//! gcp_location = "us-east4"
//! dataset_id = "claims"
//! fhir_store_id = "bcda"
//! upload_mode = "batch"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::load_config;
pub use schema::{
    ApplicationConfig, BulkFetchConfig, CheckpointConfig, FhirStoreConfig, GcsConfig, JobConfig,
    LoggingConfig, OutputConfig, PostgreSQLConfig, ServerConfig, ServerProfile, UploadMode,
};
pub use secret::{secret_string, SecretString, SecretValue};
