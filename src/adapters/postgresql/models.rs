//! PostgreSQL row models
//!
//! Maps a [`Record`] onto the `fhir_resources` table.

use crate::domain::{BulkFetchError, Record, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One row of `fhir_resources`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirResourceRow {
    /// FHIR resource type
    pub resource_type: String,

    /// Resource `id`, or a name-based UUID of the content when absent
    pub resource_id: String,

    /// Resource content in JSONB format
    pub content: Value,

    /// Result file the record was read from
    pub source_url: String,

    /// Transaction time of the export that delivered the record
    pub transaction_time: DateTime<Utc>,

    /// Version of bulkfetch that wrote the row
    pub bulkfetch_version: String,
}

impl FhirResourceRow {
    /// Build a row from a record
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload is not a JSON object.
    pub fn from_record(record: &Record, transaction_time: DateTime<Utc>) -> Result<Self> {
        let content: Value = serde_json::from_slice(record.payload())?;
        if !content.is_object() {
            return Err(BulkFetchError::Serialization(format!(
                "{} record from {} is not a JSON object",
                record.resource_type(),
                record.source_url()
            )));
        }

        let resource_id = match content.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            // Same content maps to the same id, so re-runs still upsert
            _ => Uuid::new_v5(&Uuid::NAMESPACE_OID, record.payload()).to_string(),
        };

        Ok(Self {
            resource_type: record.resource_type().to_string(),
            resource_id,
            content,
            source_url: record.source_url().to_string(),
            transaction_time,
            bulkfetch_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
