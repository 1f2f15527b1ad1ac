//! Transaction time (watermark) persistence
//!
//! The watermark is an append-only log of FHIR instants, one per line; the last
//! non-empty line is the current value. Three backends share that format:
//!
//! - **In-memory**: seeded from an explicit `since` value, never persisted
//! - **Local file**: `since_file` on the local filesystem
//! - **Cloud Storage object**: `since_file = "gs://bucket/object"`, appended by
//!   rewriting the object
//!
//! `store` must only be called after every sink has committed its output; a
//! crash before that point re-fetches the same window next run.

use crate::adapters::gcs::{GcsClient, GcsPath};
use crate::config::BulkFetchConfig;
use crate::domain::instant::{format_instant, parse_instant};
use crate::domain::{BulkFetchError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Watermark store selected from configuration
pub enum TransactionTimeStore {
    /// Single-run value, optionally seeded
    InMemory(InMemoryStore),
    /// Append-only local file
    LocalFile(LocalFileStore),
    /// Append-only Cloud Storage object
    Object(ObjectStore),
}

impl TransactionTimeStore {
    /// Select the backend named by `[checkpoint]`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if both `since` and `since_file` are set
    /// or a `gs://` path is malformed.
    pub fn from_config(config: &BulkFetchConfig) -> Result<Self> {
        let checkpoint = &config.checkpoint;
        match (&checkpoint.since, &checkpoint.since_file) {
            (Some(_), Some(_)) => Err(BulkFetchError::Configuration(
                "only one of checkpoint.since and checkpoint.since_file may be set".to_string(),
            )),
            (Some(since), None) => Ok(Self::InMemory(InMemoryStore::seeded(since.clone()))),
            (None, Some(path)) if path.starts_with("gs://") => {
                let client = GcsClient::new(&config.gcs)?;
                Ok(Self::Object(ObjectStore::new(client, GcsPath::parse(path)?)))
            }
            (None, Some(path)) => Ok(Self::LocalFile(LocalFileStore::new(path))),
            (None, None) => Ok(Self::InMemory(InMemoryStore::empty())),
        }
    }

    /// Current watermark, or `None` when nothing has been stored yet
    ///
    /// # Errors
    ///
    /// Returns [`BulkFetchError::InvalidWatermark`] if the stored value is not
    /// a valid instant, or a checkpoint store error if it cannot be read.
    pub async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let text = match self {
            Self::InMemory(store) => store.read(),
            Self::LocalFile(store) => store.read().await?,
            Self::Object(store) => store.read().await?,
        };
        text.as_deref().map(last_instant).transpose().map(Option::flatten)
    }

    /// Append a new watermark
    ///
    /// # Errors
    ///
    /// Returns a checkpoint store error if the value cannot be persisted.
    pub async fn store(&self, value: DateTime<Utc>) -> Result<()> {
        let line = format_instant(&value);
        match self {
            Self::InMemory(store) => store.append(&line),
            Self::LocalFile(store) => store.append(&line).await?,
            Self::Object(store) => store.append(&line).await?,
        }
        tracing::info!(store = %self.describe(), since = %line, "Stored transaction time");
        Ok(())
    }

    /// Human-readable description of the backend
    pub fn describe(&self) -> String {
        match self {
            Self::InMemory(_) => "memory".to_string(),
            Self::LocalFile(store) => store.path.display().to_string(),
            Self::Object(store) => store.path.to_string(),
        }
    }
}

/// Parse the last non-empty line of a watermark log
fn last_instant(text: &str) -> Result<Option<DateTime<Utc>>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(parse_instant)
        .transpose()
}

fn append_line(existing: &str, line: &str) -> String {
    let mut content = existing.to_string();
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(line);
    content.push('\n');
    content
}

/// In-memory watermark
#[derive(Default)]
pub struct InMemoryStore {
    content: Mutex<Option<String>>,
}

impl InMemoryStore {
    /// A store with nothing in it (first run fetches everything)
    pub fn empty() -> Self {
        Self::default()
    }

    /// A store seeded with an explicit watermark
    pub fn seeded(value: impl Into<String>) -> Self {
        Self {
            content: Mutex::new(Some(value.into())),
        }
    }

    fn read(&self) -> Option<String> {
        self.content
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn append(&self, line: &str) {
        let mut guard = self
            .content
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = append_line(guard.as_deref().unwrap_or(""), line);
        *guard = Some(next);
    }
}

/// Local append-only watermark file
pub struct LocalFileStore {
    path: PathBuf,
}

impl LocalFileStore {
    /// Store backed by `path`; the file is created on first `store`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BulkFetchError::CheckpointStore(format!(
                "unable to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn append(&self, line: &str) -> Result<()> {
        let io_err = |e: std::io::Error| {
            BulkFetchError::CheckpointStore(format!(
                "unable to append to {}: {e}",
                self.path.display()
            ))
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(())
    }
}

/// Cloud Storage watermark object
pub struct ObjectStore {
    client: GcsClient,
    path: GcsPath,
}

impl ObjectStore {
    /// Store backed by one object
    pub fn new(client: GcsClient, path: GcsPath) -> Self {
        Self { client, path }
    }

    async fn read(&self) -> Result<Option<String>> {
        let Some(body) = self
            .client
            .read_object(&self.path)
            .await
            .map_err(|e| BulkFetchError::CheckpointStore(e.to_string()))?
        else {
            return Ok(None);
        };
        String::from_utf8(body.to_vec()).map(Some).map_err(|e| {
            BulkFetchError::CheckpointStore(format!("{} is not UTF-8: {e}", self.path))
        })
    }

    async fn append(&self, line: &str) -> Result<()> {
        let existing = self.read().await?.unwrap_or_default();
        let content = append_line(&existing, line);
        self.client
            .write_object(&self.path, "text/plain", content)
            .await
            .map_err(|e| BulkFetchError::CheckpointStore(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_last_instant_skips_blank_lines() {
        let text = "2021-01-01T00:00:00.000+00:00\n2021-05-01T00:00:00.000+00:00\n\n";
        let ts = last_instant(text).unwrap().unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_last_instant_empty() {
        assert_eq!(last_instant("").unwrap(), None);
        assert_eq!(last_instant("\n  \n").unwrap(), None);
    }

    #[test]
    fn test_last_instant_invalid() {
        let err = last_instant("2021-01-01T00:00:00.000+00:00\nnot-a-time\n").unwrap_err();
        assert!(matches!(err, BulkFetchError::InvalidWatermark(_)));
    }

    #[test]
    fn test_append_line() {
        assert_eq!(append_line("", "b"), "b\n");
        assert_eq!(append_line("a", "b"), "a\nb\n");
        assert_eq!(append_line("a\n", "b"), "a\nb\n");
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = TransactionTimeStore::InMemory(InMemoryStore::empty());
        assert_eq!(store.load().await.unwrap(), None);

        let ts = Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap();
        store.store(ts).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(ts));
    }

    #[tokio::test]
    async fn test_seeded_in_memory_store_with_garbage() {
        let store = TransactionTimeStore::InMemory(InMemoryStore::seeded("last tuesday"));
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, BulkFetchError::InvalidWatermark(_)));
    }
}
