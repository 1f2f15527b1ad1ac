//! PostgreSQL sink
//!
//! Buffers rows and upserts them `batch_size` at a time. Rows carry the run's
//! transaction time, which is read when each record arrives.

use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::adapters::postgresql::models::FhirResourceRow;
use crate::config::PostgreSQLConfig;
use crate::core::pipeline::Sink;
use crate::domain::{BulkFetchError, Record, Result, TransactionTime};
use async_trait::async_trait;

/// Sink name used in logs and warnings
pub const SINK_NAME: &str = "postgresql";

/// Upserts records into `fhir_resources`
pub struct PostgresSink {
    client: PostgreSQLClient,
    transaction_time: TransactionTime,
    batch_size: usize,
    pending: Vec<FhirResourceRow>,
    written: u64,
}

impl PostgresSink {
    /// Connect, check the connection and ensure the schema exists
    ///
    /// # Errors
    ///
    /// Returns a configuration, connection or database error.
    pub async fn connect(
        config: &PostgreSQLConfig,
        transaction_time: &TransactionTime,
    ) -> Result<Self> {
        let batch_size = config.batch_size.max(1);
        let client = PostgreSQLClient::new(config.clone())?;
        client.test_connection().await?;
        client.ensure_schema().await?;

        Ok(Self {
            client,
            transaction_time: transaction_time.clone(),
            batch_size,
            pending: Vec::with_capacity(batch_size),
            written: 0,
        })
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.pending);
        let written = self
            .client
            .upsert_rows(&rows)
            .await
            .map_err(|e| BulkFetchError::sink(SINK_NAME, e.to_string()))?;
        self.written += written;
        tracing::debug!(rows = rows.len(), total = self.written, "Upserted batch");
        Ok(())
    }
}

#[async_trait]
impl Sink for PostgresSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn process(&mut self, record: &Record) -> Result<()> {
        let transaction_time = self.transaction_time.require()?;
        let row = FhirResourceRow::from_record(record, transaction_time)
            .map_err(|e| BulkFetchError::sink(SINK_NAME, e.to_string()))?;
        self.pending.push(row);

        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.flush().await?;
        tracing::info!(
            rows = self.written,
            database = %self.client.connection_string_safe(),
            "PostgreSQL sink finalized"
        );
        Ok(())
    }
}
