//! FHIR store sink
//!
//! Uploads records to a Healthcare API FHIR store in one of three modes:
//!
//! - **individual**: one `PUT`/`POST` per record
//! - **batch**: `batch` Bundles of `batch_upload_size` records
//! - **gcs**: NDJSON parts staged under `gs://{bucket}/{transaction time}/`,
//!   then a single store import on finalize
//!
//! Individual and batch uploads run in the background on at most
//! `max_upload_workers` tasks. `finalize` waits for all of them.

use super::client::{FhirStoreClient, OperationStatus};
use crate::adapters::gcs::{GcsClient, GcsPath};
use crate::config::{FhirStoreConfig, GcsConfig, UploadMode};
use crate::core::pipeline::Sink;
use crate::domain::instant::format_instant;
use crate::domain::{BulkFetchError, Record, ResourceType, Result, TransactionTime};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::task::{JoinError, JoinSet};

/// Sink name used in logs and warnings
pub const SINK_NAME: &str = "fhir_store";

/// File name of the failed upload report
pub const ERROR_FILE_NAME: &str = "resources_with_errors.ndjson";

/// Staged NDJSON part size that triggers a write to Cloud Storage
const GCS_PART_BYTES: usize = 32 * 1024 * 1024;

/// One resource the store did not accept
#[derive(Debug, Clone)]
pub struct UploadFailure {
    /// Resource type of the record
    pub resource_type: ResourceType,

    /// Record as submitted
    pub payload: Bytes,

    /// Store or transport error
    pub error: String,
}

struct GcsStaging {
    client: GcsClient,
    bucket: String,
    transaction_time: TransactionTime,
    buffers: BTreeMap<ResourceType, BytesMut>,
    parts_written: BTreeMap<ResourceType, usize>,
    import_poll_interval: Duration,
    import_timeout: Duration,
}

enum Mode {
    Individual,
    Batch(usize),
    Gcs(Box<GcsStaging>),
}

/// Healthcare FHIR store sink
pub struct FhirStoreSink {
    client: FhirStoreClient,
    mode: Mode,
    max_workers: usize,
    error_file_dir: Option<PathBuf>,
    uploads: JoinSet<Vec<UploadFailure>>,
    pending_batch: Vec<(ResourceType, Bytes)>,
    failures: Vec<UploadFailure>,
    lost_tasks: usize,
    submitted: usize,
    tolerate_errors: bool,
}

impl FhirStoreSink {
    /// Create a sink from configuration
    ///
    /// `transaction_time` is only read in `gcs` mode, to name the staging prefix.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a client cannot be built or `gcs` mode
    /// has no bucket.
    pub fn from_config(
        config: &FhirStoreConfig,
        gcs: &GcsConfig,
        transaction_time: &TransactionTime,
    ) -> Result<Self> {
        let mode = match config.upload_mode {
            UploadMode::Individual => Mode::Individual,
            UploadMode::Batch => Mode::Batch(config.batch_upload_size.max(1)),
            UploadMode::Gcs => {
                let bucket = config
                    .gcs_bucket
                    .clone()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| {
                        BulkFetchError::Configuration(
                            "fhir_store.gcs_bucket is required when upload_mode = 'gcs'"
                                .to_string(),
                        )
                    })?;
                Mode::Gcs(Box::new(GcsStaging {
                    client: GcsClient::new(gcs)?,
                    bucket,
                    transaction_time: transaction_time.clone(),
                    buffers: BTreeMap::new(),
                    parts_written: BTreeMap::new(),
                    import_poll_interval: Duration::from_secs(config.import_poll_interval_seconds),
                    import_timeout: Duration::from_secs(config.import_timeout_seconds),
                }))
            }
        };

        tracing::info!(
            store = %config.store_path(),
            mode = ?config.upload_mode,
            max_workers = config.max_upload_workers,
            "FHIR store sink configured"
        );

        Ok(Self {
            client: FhirStoreClient::new(config)?,
            mode,
            max_workers: config.max_upload_workers.max(1),
            error_file_dir: config.upload_error_file_dir.as_ref().map(PathBuf::from),
            uploads: JoinSet::new(),
            pending_batch: Vec::new(),
            failures: Vec::new(),
            lost_tasks: 0,
            submitted: 0,
            tolerate_errors: false,
        })
    }

    /// Report failed uploads as warnings instead of failing the run
    ///
    /// Rejected resources still land in the error report when
    /// `upload_error_file_dir` is set.
    pub fn with_error_tolerance(mut self, tolerate: bool) -> Self {
        self.tolerate_errors = tolerate;
        self
    }

    /// Failures collected so far
    pub fn failures(&self) -> &[UploadFailure] {
        &self.failures
    }

    fn collect(&mut self, joined: std::result::Result<Vec<UploadFailure>, JoinError>) {
        match joined {
            Ok(failures) => self.failures.extend(failures),
            Err(e) => {
                tracing::error!(error = %e, "Upload task did not complete");
                self.lost_tasks += 1;
            }
        }
    }

    /// Wait until fewer than `max_workers` uploads are in flight
    async fn reserve_worker(&mut self) {
        while self.uploads.len() >= self.max_workers {
            match self.uploads.join_next().await {
                Some(joined) => self.collect(joined),
                None => break,
            }
        }
    }

    async fn spawn_individual(&mut self, resource_type: ResourceType, payload: Bytes) {
        self.reserve_worker().await;
        let client = self.client.clone();
        self.uploads.spawn(async move {
            match client.upload_resource(&resource_type, payload.clone()).await {
                Ok(()) => Vec::new(),
                Err(e) => vec![UploadFailure {
                    resource_type,
                    payload,
                    error: e.to_string(),
                }],
            }
        });
    }

    async fn spawn_batch(&mut self) {
        if self.pending_batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending_batch);
        self.reserve_worker().await;
        let client = self.client.clone();
        self.uploads.spawn(async move {
            match client.upload_batch(&batch).await {
                Ok(outcomes) => batch
                    .into_iter()
                    .zip(outcomes)
                    .filter_map(|((resource_type, payload), outcome)| {
                        outcome.map(|error| UploadFailure {
                            resource_type,
                            payload,
                            error,
                        })
                    })
                    .collect(),
                Err(e) => {
                    let error = e.to_string();
                    batch
                        .into_iter()
                        .map(|(resource_type, payload)| UploadFailure {
                            resource_type,
                            payload,
                            error: error.clone(),
                        })
                        .collect()
                }
            }
        });
    }

    async fn finish_uploads(&mut self) -> Result<()> {
        self.spawn_batch().await;
        while let Some(joined) = self.uploads.join_next().await {
            self.collect(joined);
        }

        if self.failures.is_empty() && self.lost_tasks == 0 {
            tracing::info!(resources = self.submitted, "All resources uploaded to FHIR store");
            return Ok(());
        }

        if let Some(ref dir) = self.error_file_dir {
            let path = write_error_report(dir, &self.failures).await?;
            tracing::warn!(
                path = %path.display(),
                failed = self.failures.len(),
                "Wrote failed uploads report"
            );
        }

        let mut message = format!(
            "{} of {} resources failed to upload",
            self.failures.len(),
            self.submitted
        );
        if self.lost_tasks > 0 {
            message.push_str(&format!("; {} upload tasks aborted", self.lost_tasks));
        }
        Err(BulkFetchError::sink(SINK_NAME, message))
    }
}

impl GcsStaging {
    fn prefix(&self) -> Result<String> {
        Ok(format_instant(&self.transaction_time.require()?))
    }

    async fn stage(&mut self, record: &Record) -> Result<()> {
        let buffer = self
            .buffers
            .entry(record.resource_type().clone())
            .or_default();
        buffer.extend_from_slice(record.payload());
        buffer.extend_from_slice(b"\n");

        if buffer.len() >= GCS_PART_BYTES {
            self.write_part(record.resource_type()).await?;
        }
        Ok(())
    }

    async fn write_part(&mut self, resource_type: &ResourceType) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(resource_type) else {
            return Ok(());
        };
        if buffer.is_empty() {
            return Ok(());
        }
        let body = buffer.split().freeze();

        let part = self.parts_written.entry(resource_type.clone()).or_default();
        let path = GcsPath {
            bucket: self.bucket.clone(),
            object: format!(
                "{}/{}_{}.ndjson",
                format_instant(&self.transaction_time.require()?),
                resource_type,
                part
            ),
        };
        *part += 1;

        tracing::debug!(object = %path, bytes = body.len(), "Writing staged NDJSON part");
        self.client
            .write_object(&path, "application/x-ndjson", body)
            .await
            .map_err(|e| BulkFetchError::sink(SINK_NAME, e.to_string()))
    }

    async fn import(&mut self, client: &FhirStoreClient) -> Result<()> {
        let resource_types: Vec<ResourceType> = self.buffers.keys().cloned().collect();
        for resource_type in &resource_types {
            self.write_part(resource_type).await?;
        }

        if self.parts_written.is_empty() {
            tracing::info!("No records staged, skipping FHIR store import");
            return Ok(());
        }

        let source = format!("gs://{}/{}/**", self.bucket, self.prefix()?);
        let operation = client.import_from_gcs(&source).await?;
        tracing::info!(source = %source, operation = %operation, "FHIR store import started");

        let started = Instant::now();
        loop {
            match client.operation_status(&operation).await? {
                OperationStatus::Done => {
                    tracing::info!(operation = %operation, "FHIR store import finished");
                    return Ok(());
                }
                OperationStatus::Failed(message) => {
                    return Err(BulkFetchError::sink(
                        SINK_NAME,
                        format!("import {operation} failed: {message}"),
                    ));
                }
                OperationStatus::Running => {}
            }

            if started.elapsed() >= self.import_timeout {
                return Err(BulkFetchError::sink(
                    SINK_NAME,
                    format!(
                        "import {operation} did not finish within {:?}",
                        self.import_timeout
                    ),
                ));
            }
            tokio::time::sleep(self.import_poll_interval).await;
        }
    }
}

#[async_trait]
impl Sink for FhirStoreSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn tolerates_errors(&self) -> bool {
        self.tolerate_errors
    }

    async fn process(&mut self, record: &Record) -> Result<()> {
        self.submitted += 1;
        match self.mode {
            Mode::Individual => {
                self.spawn_individual(record.resource_type().clone(), record.payload().clone())
                    .await;
            }
            Mode::Batch(size) => {
                self.pending_batch
                    .push((record.resource_type().clone(), record.payload().clone()));
                if self.pending_batch.len() >= size {
                    self.spawn_batch().await;
                }
            }
            Mode::Gcs(ref mut staging) => staging.stage(record).await?,
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        match self.mode {
            Mode::Gcs(ref mut staging) => staging.import(&self.client).await,
            Mode::Individual | Mode::Batch(_) => self.finish_uploads().await,
        }
    }
}

async fn write_error_report(dir: &Path, failures: &[UploadFailure]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(ERROR_FILE_NAME);
    let mut file = tokio::io::BufWriter::new(tokio::fs::File::create(&path).await?);
    for failure in failures {
        let line = json!({
            "err": failure.error,
            "fhir_resource": String::from_utf8_lossy(&failure.payload),
        });
        file.write_all(serde_json::to_string(&line)?.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_error_report_lines() {
        let dir = TempDir::new().unwrap();
        let failures = vec![UploadFailure {
            resource_type: ResourceType::new("Patient").unwrap(),
            payload: Bytes::from_static(br#"{"id":"p1"}"#),
            error: "400 Bad Request".to_string(),
        }];

        let path = write_error_report(dir.path(), &failures)
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), ERROR_FILE_NAME);

        let content = std::fs::read_to_string(path).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(line["err"], "400 Bad Request");
        assert_eq!(line["fhir_resource"], r#"{"id":"p1"}"#);
    }

    #[test]
    fn test_gcs_mode_requires_bucket() {
        let config = FhirStoreConfig {
            gcp_project: "p".to_string(),
            gcp_location: "l".to_string(),
            dataset_id: "d".to_string(),
            fhir_store_id: "s".to_string(),
            upload_mode: UploadMode::Gcs,
            ..Default::default()
        };
        let result =
            FhirStoreSink::from_config(&config, &GcsConfig::default(), &TransactionTime::new());
        assert!(matches!(result, Err(BulkFetchError::Configuration(_))));
    }
}
