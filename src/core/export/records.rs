//! NDJSON record splitting
//!
//! Splits a result file body into lines with a hard upper bound on line length.
//! An oversize line or invalid UTF-8 ends the file with a
//! [`BulkFetchError::RecordParse`]. Blank lines are skipped.

use crate::domain::{BulkFetchError, ResourceType, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Line length limits for result files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLimits {
    /// Largest accepted line, excluding the newline
    pub max_record_bytes: usize,

    /// Initial read buffer capacity
    pub initial_buffer_bytes: usize,
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self {
            max_record_bytes: 500 * 1024,
            initial_buffer_bytes: 5 * 1024,
        }
    }
}

/// Stream the non-blank lines of `reader` as raw record bytes
///
/// # Arguments
///
/// * `reader` - Result file body
/// * `resource_type` - Resource type of the file, for error context
/// * `url` - Source URL, for error context
/// * `limits` - Line length bound and buffer size
pub fn ndjson_records<'a, R>(
    reader: R,
    resource_type: &'a ResourceType,
    url: &'a str,
    limits: RecordLimits,
) -> impl Stream<Item = Result<Bytes>> + Send + 'a
where
    R: AsyncRead + Send + Unpin + 'a,
{
    let codec = LinesCodec::new_with_max_length(limits.max_record_bytes);
    FramedRead::with_capacity(reader, codec, limits.initial_buffer_bytes).filter_map(
        move |line| {
            let item = match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(Ok(Bytes::from(line))),
                Err(e) => Some(Err(parse_error(e, resource_type, url, limits))),
            };
            futures::future::ready(item)
        },
    )
}

fn parse_error(
    error: LinesCodecError,
    resource_type: &ResourceType,
    url: &str,
    limits: RecordLimits,
) -> BulkFetchError {
    let message = match error {
        LinesCodecError::MaxLineLengthExceeded => format!(
            "record exceeds the maximum size of {} bytes",
            limits.max_record_bytes
        ),
        LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            format!("record is not valid UTF-8: {e}")
        }
        LinesCodecError::Io(e) => format!("read failed: {e}"),
    };
    BulkFetchError::RecordParse {
        url: url.to_string(),
        resource_type: resource_type.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Cursor;

    fn patient() -> ResourceType {
        ResourceType::new("Patient").unwrap()
    }

    async fn collect(body: &[u8], limits: RecordLimits) -> Result<Vec<Bytes>> {
        let rt = patient();
        ndjson_records(Cursor::new(body.to_vec()), &rt, "https://bulk/1", limits)
            .try_collect()
            .await
    }

    #[tokio::test]
    async fn test_splits_lines_and_skips_blanks() {
        let records = collect(b"{\"id\":1}\n\n{\"id\":2}\r\n{\"id\":3}", RecordLimits::default())
            .await
            .unwrap();
        assert_eq!(
            records,
            vec![
                Bytes::from_static(b"{\"id\":1}"),
                Bytes::from_static(b"{\"id\":2}"),
                Bytes::from_static(b"{\"id\":3}"),
            ]
        );
    }

    #[tokio::test]
    async fn test_oversize_record_is_parse_error() {
        let limits = RecordLimits {
            max_record_bytes: 16,
            initial_buffer_bytes: 4,
        };
        let body = format!("{{\"id\":1}}\n{{\"text\":\"{}\"}}\n", "x".repeat(64));
        let err = collect(body.as_bytes(), limits).await.unwrap_err();
        match err {
            BulkFetchError::RecordParse {
                url,
                resource_type,
                message,
            } => {
                assert_eq!(url, "https://bulk/1");
                assert_eq!(resource_type, "Patient");
                assert!(message.contains("16 bytes"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_parse_error() {
        let err = collect(b"{\"id\":\xff}\n", RecordLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkFetchError::RecordParse { .. }));
    }

    #[tokio::test]
    async fn test_empty_body() {
        assert!(collect(b"", RecordLimits::default()).await.unwrap().is_empty());
    }
}
