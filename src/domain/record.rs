//! Record unit of work
//!
//! One NDJSON line read from a result file, tagged with where it came from.

use crate::domain::ids::ResourceType;
use bytes::Bytes;

/// One line of downloaded data
///
/// Records are immutable; processors produce new records through
/// [`Record::with_payload`]. Cloning is cheap (the payload is reference counted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    resource_type: ResourceType,
    source_url: String,
    payload: Bytes,
}

impl Record {
    /// Creates a new record
    pub fn new(
        resource_type: ResourceType,
        source_url: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            resource_type,
            source_url: source_url.into(),
            payload: payload.into(),
        }
    }

    /// Resource type of the result file this record was read from
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// URL of the result file this record was read from
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Raw record bytes (one JSON document, no trailing newline)
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Same provenance, new payload
    pub fn with_payload(&self, payload: impl Into<Bytes>) -> Self {
        Self {
            resource_type: self.resource_type.clone(),
            source_url: self.source_url.clone(),
            payload: payload.into(),
        }
    }
}
