//! NDJSON file output
//!
//! Writes one file per resource type, `{output_prefix}{ResourceType}.ndjson`.
//! Files are truncated when first opened in a run.

use crate::core::pipeline::Sink;
use crate::domain::{BulkFetchError, Record, ResourceType, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Sink name used in logs and warnings
pub const SINK_NAME: &str = "ndjson";

/// Writes records to local NDJSON files
pub struct NdjsonFileSink {
    prefix: String,
    writers: BTreeMap<ResourceType, BufWriter<File>>,
    lines: BTreeMap<ResourceType, usize>,
}

impl NdjsonFileSink {
    /// Create a sink writing under `prefix`
    ///
    /// `prefix` is prepended verbatim, so `out/` gives `out/Patient.ndjson` and
    /// `out/run1_` gives `out/run1_Patient.ndjson`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            writers: BTreeMap::new(),
            lines: BTreeMap::new(),
        }
    }

    /// Output path for a resource type
    pub fn path_for(&self, resource_type: &ResourceType) -> PathBuf {
        PathBuf::from(format!("{}{}.ndjson", self.prefix, resource_type))
    }

    async fn open(path: &Path) -> Result<BufWriter<File>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        Ok(BufWriter::new(file))
    }
}

#[async_trait]
impl Sink for NdjsonFileSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn process(&mut self, record: &Record) -> Result<()> {
        let resource_type = record.resource_type();
        if !self.writers.contains_key(resource_type) {
            let path = self.path_for(resource_type);
            let writer = Self::open(&path).await.map_err(|e| {
                BulkFetchError::sink(SINK_NAME, format!("cannot open {}: {e}", path.display()))
            })?;
            tracing::debug!(path = %path.display(), "Opened NDJSON output");
            self.writers.insert(resource_type.clone(), writer);
        }

        if let Some(writer) = self.writers.get_mut(resource_type) {
            writer.write_all(record.payload()).await?;
            writer.write_all(b"\n").await?;
        }
        *self.lines.entry(resource_type.clone()).or_default() += 1;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        for (resource_type, writer) in self.writers.iter_mut() {
            let result = async {
                writer.flush().await?;
                writer.get_ref().sync_all().await
            }
            .await;
            match result {
                Ok(()) => tracing::info!(
                    path = %format!("{}{}.ndjson", self.prefix, resource_type),
                    records = self.lines.get(resource_type).copied().unwrap_or_default(),
                    "NDJSON output written"
                ),
                Err(e) => errors.push(format!("{resource_type}: {e}")),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BulkFetchError::sink(SINK_NAME, errors.join("; ")))
        }
    }
}
