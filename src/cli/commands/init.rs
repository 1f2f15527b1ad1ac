//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! configuration file.

use crate::cli::{EXIT_CONFIG, EXIT_FATAL, EXIT_SUCCESS};
use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "bulkfetch.toml")]
    pub output: String,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        if Path::new(&self.output).exists() && !self.force {
            println!("Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(EXIT_CONFIG);
        }

        match fs::write(&self.output, Self::sample_config()) {
            Ok(_) => {
                println!("Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your settings", self.output);
                println!("  2. Set BULKFETCH_CLIENT_ID and BULKFETCH_CLIENT_SECRET (or use a .env file)");
                println!("  3. Validate configuration: bulkfetch validate-config");
                println!("  4. Run a fetch: bulkfetch fetch");
                println!();
                Ok(EXIT_SUCCESS)
            }
            Err(e) => {
                println!("Failed to write configuration file");
                println!("   Error: {e}");
                Ok(EXIT_FATAL)
            }
        }
    }

    /// Sample configuration
    fn sample_config() -> String {
        r#"# bulkfetch configuration
# Incremental fetch from a bulk FHIR export API

[application]
log_level = "info"

# ============================================================================
# Bulk data server
# ============================================================================
[server]
# bcda: base_url + /api/v2, token at /auth/token
# generic: base_url is the FHIR base, auth_url and auth_scopes are required
profile = "bcda"
base_url = "https://sandbox.bcda.cms.gov"
# auth_url = "https://auth.example.com/oauth2/token"
# auth_scopes = ["system/*.read"]

client_id = "${BULKFETCH_CLIENT_ID}"
client_secret = "${BULKFETCH_CLIENT_SECRET}"

resource_types = ["Patient", "Coverage", "ExplanationOfBenefit"]
group = "all"
# pending_job_url = "https://sandbox.bcda.cms.gov/api/v2/jobs/42"

# ============================================================================
# Job polling and downloads
# ============================================================================
[job]
poll_interval_seconds = 5
timeout_seconds = 21600
fetch_backoff_seconds = 2
max_record_bytes = 512000
initial_buffer_bytes = 5120

# ============================================================================
# Watermark
# ============================================================================
[checkpoint]
# Set at most one of these. Without either every run fetches everything.
# since = "2021-05-01T00:00:00.000+00:00"
since_file = "bulkfetch_since.txt"
# since_file = "gs://my-bucket/bulkfetch/since.txt"

# ============================================================================
# Outputs
# ============================================================================
[output]
output_prefix = "out/"
rectify = false
no_fail_on_upload_errors = false

# [fhir_store]
# gcp_project = "my-project"
# gcp_location = "us-east4"
# dataset_id = "claims"
# fhir_store_id = "bcda"
# access_token = "${BULKFETCH_FHIR_STORE_TOKEN}"
# upload_mode = "individual"        # individual | batch | gcs
# max_upload_workers = 10
# batch_upload_size = 5
# gcs_bucket = "my-staging-bucket"
# upload_error_file_dir = "upload_errors"

# [gcs]
# access_token = "${BULKFETCH_GCS_TOKEN}"

# [postgresql]
# connection_string = "${BULKFETCH_PG_CONNECTION_STRING}"
# max_connections = 10
# ssl_mode = "prefer"                # disable | allow | prefer | require | verify-ca | verify-full
# batch_size = 500

# ============================================================================
# Logging
# ============================================================================
[logging]
local_enabled = false
local_path = "logs"
local_rotation = "daily"              # daily | hourly | never
json_console = false
"#
        .to_string()
    }
}
