//! Record processors
//!
//! Processors transform a record before it is handed to the sinks. They run
//! in configured order and the first failure aborts the record.

use crate::domain::{BulkFetchError, Record, Result};
use serde_json::Value;

/// Pure per-record transformation
pub trait Processor: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Transform one record
    ///
    /// # Errors
    ///
    /// Returns [`BulkFetchError::Processor`] if the record cannot be processed.
    fn process(&self, record: Record) -> Result<Record>;
}

/// Makes records acceptable to a FHIR R4 store
///
/// Each record must be a JSON object. A missing `resourceType` is filled in
/// from the result file's resource type; a different one is rejected. The
/// output is compact JSON.
#[derive(Debug, Default, Clone)]
pub struct RectifyProcessor;

impl RectifyProcessor {
    /// Name reported in errors
    pub const NAME: &'static str = "rectify";

    /// Creates a new rectify processor
    pub fn new() -> Self {
        Self
    }
}

impl Processor for RectifyProcessor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process(&self, record: Record) -> Result<Record> {
        let mut value: Value = serde_json::from_slice(record.payload()).map_err(|e| {
            BulkFetchError::processor(
                Self::NAME,
                format!("record from {} is not valid JSON: {e}", record.source_url()),
            )
        })?;

        let expected = record.resource_type().as_str();
        let object = value.as_object_mut().ok_or_else(|| {
            BulkFetchError::processor(
                Self::NAME,
                format!("record from {} is not a JSON object", record.source_url()),
            )
        })?;

        match object.get("resourceType").and_then(Value::as_str) {
            Some(found) if found == expected => {}
            Some(found) => {
                return Err(BulkFetchError::processor(
                    Self::NAME,
                    format!(
                        "record from {} has resourceType '{found}', expected '{expected}'",
                        record.source_url()
                    ),
                ))
            }
            None => {
                object.insert(
                    "resourceType".to_string(),
                    Value::String(expected.to_string()),
                );
            }
        }

        let payload = serde_json::to_vec(&value)?;
        Ok(record.with_payload(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceType;

    fn record(payload: &str) -> Record {
        Record::new(
            ResourceType::new("Patient").unwrap(),
            "https://bulk.example.com/1.ndjson",
            payload.to_string(),
        )
    }

    #[test]
    fn test_fills_missing_resource_type() {
        let out = RectifyProcessor::new()
            .process(record(r#"{ "id": "p1" }"#))
            .unwrap();
        let value: Value = serde_json::from_slice(out.payload()).unwrap();
        assert_eq!(value["resourceType"], "Patient");
        assert_eq!(value["id"], "p1");
    }

    #[test]
    fn test_compacts_matching_record() {
        let out = RectifyProcessor::new()
            .process(record(r#"{ "resourceType": "Patient",  "id": "p1" }"#))
            .unwrap();
        assert!(!out.payload().contains(&b' '));
    }

    #[test]
    fn test_rejects_conflicting_resource_type() {
        let err = RectifyProcessor::new()
            .process(record(r#"{"resourceType":"Coverage","id":"c1"}"#))
            .unwrap_err();
        assert!(matches!(err, BulkFetchError::Processor { .. }));
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(RectifyProcessor::new().process(record("[1,2]")).is_err());
        assert!(RectifyProcessor::new().process(record("{oops")).is_err());
    }
}
