//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::BulkFetchConfig;
use super::secret::secret_string;
use crate::domain::errors::BulkFetchError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Loads a `.env` file from the working directory, if present
/// 2. Reads the TOML file
/// 3. Performs environment variable substitution (${VAR} syntax)
/// 4. Parses the TOML into BulkFetchConfig
/// 5. Applies environment variable overrides (BULKFETCH_* prefix)
/// 6. Validates the configuration
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// Returns [`BulkFetchError::Configuration`] if the file cannot be read or
/// parsed, a referenced variable is unset, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use bulkfetch::config::loader::load_config;
///
/// let config = load_config("bulkfetch.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<BulkFetchConfig> {
    let _ = dotenvy::dotenv();

    let config = parse_config_file(path)?;
    config.validate().map_err(|e| {
        BulkFetchError::Configuration(format!("Configuration validation failed: {}", e))
    })?;
    Ok(config)
}

/// Reads, substitutes and parses a configuration file without validating it
///
/// # Errors
///
/// Returns [`BulkFetchError::Configuration`] on read, substitution or parse
/// failures.
pub fn parse_config_file(path: impl AsRef<Path>) -> Result<BulkFetchConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(BulkFetchError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        BulkFetchError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config_str(&contents)
}

/// Parses configuration text: substitution, TOML, then environment overrides
///
/// # Errors
///
/// Returns [`BulkFetchError::Configuration`] on substitution or parse failures.
pub fn parse_config_str(contents: &str) -> Result<BulkFetchConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: BulkFetchConfig = toml::from_str(&contents)
        .map_err(|e| BulkFetchError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| BulkFetchError::Configuration(e.to_string()))?;
    let mut lines = Vec::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let processed = re.replace_all(line, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });
        lines.push(processed.into_owned());
    }

    if !missing_vars.is_empty() {
        return Err(BulkFetchError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env(key) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            BulkFetchError::Configuration(format!("Invalid value '{raw}' for {key}"))
        }),
        None => Ok(None),
    }
}

/// Applies environment variable overrides using BULKFETCH_* prefix
///
/// Environment variables follow the pattern: BULKFETCH_<SECTION>_<KEY>
/// For example: BULKFETCH_SERVER_CLIENT_ID, BULKFETCH_JOB_TIMEOUT_SECONDS
fn apply_env_overrides(config: &mut BulkFetchConfig) -> Result<()> {
    // Application overrides
    if let Some(val) = env("BULKFETCH_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }

    // Server overrides
    if let Some(val) = env("BULKFETCH_SERVER_BASE_URL") {
        config.server.base_url = val;
    }
    if let Some(val) = env("BULKFETCH_SERVER_AUTH_URL") {
        config.server.auth_url = Some(val);
    }
    if let Some(val) = env("BULKFETCH_SERVER_AUTH_SCOPES") {
        config.server.auth_scopes = split_list(&val);
    }
    if let Some(val) = env("BULKFETCH_SERVER_CLIENT_ID") {
        config.server.client_id = val;
    }
    if let Some(val) = env("BULKFETCH_SERVER_CLIENT_SECRET") {
        config.server.client_secret = Some(secret_string(val));
    }
    if let Some(val) = env("BULKFETCH_SERVER_RESOURCE_TYPES") {
        config.server.resource_types = split_list(&val);
    }
    if let Some(val) = env("BULKFETCH_SERVER_GROUP") {
        config.server.group = val;
    }
    if let Some(val) = env("BULKFETCH_SERVER_PENDING_JOB_URL") {
        config.server.pending_job_url = Some(val);
    }

    // Job overrides
    if let Some(val) = env_parse("BULKFETCH_JOB_POLL_INTERVAL_SECONDS")? {
        config.job.poll_interval_seconds = val;
    }
    if let Some(val) = env_parse("BULKFETCH_JOB_TIMEOUT_SECONDS")? {
        config.job.timeout_seconds = val;
    }
    if let Some(val) = env_parse("BULKFETCH_JOB_MAX_RECORD_BYTES")? {
        config.job.max_record_bytes = val;
    }

    // Checkpoint overrides
    if let Some(val) = env("BULKFETCH_CHECKPOINT_SINCE") {
        config.checkpoint.since = Some(val);
    }
    if let Some(val) = env("BULKFETCH_CHECKPOINT_SINCE_FILE") {
        config.checkpoint.since_file = Some(val);
    }

    // Output overrides
    if let Some(val) = env("BULKFETCH_OUTPUT_OUTPUT_PREFIX") {
        config.output.output_prefix = Some(val);
    }
    if let Some(val) = env_parse("BULKFETCH_OUTPUT_RECTIFY")? {
        config.output.rectify = val;
    }
    if let Some(val) = env_parse("BULKFETCH_OUTPUT_NO_FAIL_ON_UPLOAD_ERRORS")? {
        config.output.no_fail_on_upload_errors = val;
    }

    // FHIR store overrides (only if the store is configured)
    if let Some(ref mut store) = config.fhir_store {
        if let Some(val) = env("BULKFETCH_FHIR_STORE_ACCESS_TOKEN") {
            store.access_token = Some(secret_string(val));
        }
        if let Some(val) = env_parse("BULKFETCH_FHIR_STORE_MAX_UPLOAD_WORKERS")? {
            store.max_upload_workers = val;
        }
        if let Some(val) = env("BULKFETCH_FHIR_STORE_GCS_BUCKET") {
            store.gcs_bucket = Some(val);
        }
    }

    // GCS overrides
    if let Some(val) = env("BULKFETCH_GCS_ACCESS_TOKEN") {
        config.gcs.access_token = Some(secret_string(val));
    }

    // PostgreSQL overrides
    if let Some(ref mut pg) = config.postgresql {
        if let Some(val) = env("BULKFETCH_POSTGRESQL_CONNECTION_STRING") {
            pg.connection_string = secret_string(val);
        }
        if let Some(val) = env_parse("BULKFETCH_POSTGRESQL_MAX_CONNECTIONS")? {
            pg.max_connections = val;
        }
    }

    // Logging overrides
    if let Some(val) = env_parse("BULKFETCH_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = val;
    }
    if let Some(val) = env("BULKFETCH_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
