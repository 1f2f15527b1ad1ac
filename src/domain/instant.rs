//! FHIR instant formatting
//!
//! Watermarks are exchanged with the bulk data server and persisted by the
//! checkpoint stores as FHIR instants: `YYYY-MM-DDThh:mm:ss.sss+zz:zz`.

use crate::domain::{BulkFetchError, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Parse a FHIR instant (any RFC 3339 timestamp with an explicit offset)
///
/// # Examples
///
/// ```
/// use bulkfetch::domain::instant::{format_instant, parse_instant};
///
/// let ts = parse_instant("2021-05-01T00:00:00.000+00:00").unwrap();
/// assert_eq!(format_instant(&ts), "2021-05-01T00:00:00.000+00:00");
/// ```
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| BulkFetchError::InvalidWatermark(format!("'{value}': {e}")))
}

/// Format a timestamp as a FHIR instant with millisecond precision
pub fn format_instant(value: &DateTime<Utc>) -> String {
    // `false` keeps the numeric `+00:00` offset instead of `Z`
    value.to_rfc3339_opts(SecondsFormat::Millis, false)
}
