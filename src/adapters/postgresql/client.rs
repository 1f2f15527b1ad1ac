//! PostgreSQL client implementation
//!
//! This module provides the pooled client used by the PostgreSQL sink.

use crate::adapters::postgresql::models::FhirResourceRow;
use crate::config::PostgreSQLConfig;
use crate::domain::{BulkFetchError, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::NoTls;

const UPSERT_RESOURCE: &str = r#"
    INSERT INTO fhir_resources (
        resource_type, resource_id, content, source_url,
        transaction_time, fetched_at, bulkfetch_version
    )
    VALUES ($1, $2, $3, $4, $5, NOW(), $6)
    ON CONFLICT (resource_type, resource_id) DO UPDATE SET
        content = EXCLUDED.content,
        source_url = EXCLUDED.source_url,
        transaction_time = EXCLUDED.transaction_time,
        fetched_at = EXCLUDED.fetched_at,
        bulkfetch_version = EXCLUDED.bulkfetch_version
"#;

/// PostgreSQL client for bulkfetch
///
/// Wraps a `deadpool-postgres` pool. TLS is negotiated through `native-tls`
/// unless `ssl_mode = "disable"`.
pub struct PostgreSQLClient {
    /// Connection pool
    pool: Pool,

    /// Configuration
    config: PostgreSQLConfig,
}

impl PostgreSQLClient {
    /// Create a new PostgreSQL client
    ///
    /// No connection is opened until the pool is first used.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid or the pool
    /// cannot be built.
    pub fn new(config: PostgreSQLConfig) -> Result<Self> {
        let conn_str = config.connection_string.expose_secret().as_str();
        let mut pg_config: tokio_postgres::Config = conn_str.parse().map_err(|e| {
            BulkFetchError::Configuration(format!("Invalid PostgreSQL connection string: {e}"))
        })?;
        pg_config.ssl_mode(ssl_mode(&config.ssl_mode));

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = if config.ssl_mode == "disable" {
            Manager::from_config(pg_config, NoTls, manager_config)
        } else {
            let connector = native_tls::TlsConnector::builder().build().map_err(|e| {
                BulkFetchError::Configuration(format!("Failed to build TLS connector: {e}"))
            })?;
            let tls = postgres_native_tls::MakeTlsConnector::new(connector);
            Manager::from_config(pg_config, tls, manager_config)
        };

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| {
                BulkFetchError::Database(format!("Failed to create connection pool: {e}"))
            })?;

        Ok(Self { pool, config })
    }

    /// Test the connection to PostgreSQL
    ///
    /// Attempts to get a connection from the pool and execute a simple query.
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;

        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| BulkFetchError::Connection(format!("Connection test failed: {e}")))?;

        tracing::info!(
            database = %self.connection_string_safe(),
            "PostgreSQL connection test successful"
        );
        Ok(())
    }

    /// Ensure the `fhir_resources` table exists
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.get_connection().await?;

        let migration_sql = include_str!("../../../migrations/001_initial_schema.sql");

        client
            .batch_execute(migration_sql)
            .await
            .map_err(|e| BulkFetchError::Database(format!("Failed to execute migration: {e}")))?;

        tracing::info!("PostgreSQL schema initialized successfully");
        Ok(())
    }

    /// Get a connection from the pool
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be obtained.
    pub async fn get_connection(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            BulkFetchError::Connection(format!("Failed to get connection from pool: {e}"))
        })
    }

    /// Upsert rows in one transaction
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns a database error if any statement fails; the transaction is
    /// rolled back.
    pub async fn upsert_rows(&self, rows: &[FhirResourceRow]) -> Result<u64> {
        let mut client = self.get_connection().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| BulkFetchError::Database(format!("Failed to begin transaction: {e}")))?;

        let timeout_query = format!(
            "SET LOCAL statement_timeout = {}",
            self.config.statement_timeout_seconds * 1000
        );
        tx.batch_execute(&timeout_query)
            .await
            .map_err(|e| {
                BulkFetchError::Database(format!("Failed to set statement timeout: {e}"))
            })?;

        let statement = tx
            .prepare_cached(UPSERT_RESOURCE)
            .await
            .map_err(|e| BulkFetchError::Database(format!("Failed to prepare upsert: {e}")))?;

        let mut written = 0;
        for row in rows {
            written += tx
                .execute(
                    &statement,
                    &[
                        &row.resource_type,
                        &row.resource_id,
                        &row.content,
                        &row.source_url,
                        &row.transaction_time,
                        &row.bulkfetch_version,
                    ],
                )
                .await
                .map_err(|e| {
                    BulkFetchError::Database(format!(
                        "Upsert of {}/{} failed: {e}",
                        row.resource_type, row.resource_id
                    ))
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| BulkFetchError::Database(format!("Failed to commit transaction: {e}")))?;
        Ok(written)
    }

    /// Get the connection string (without password)
    pub fn connection_string_safe(&self) -> String {
        redact_connection_string(self.config.connection_string.expose_secret().as_str())
    }
}

fn ssl_mode(mode: &str) -> SslMode {
    match mode {
        "disable" => SslMode::Disable,
        "require" | "verify-ca" | "verify-full" => SslMode::Require,
        _ => SslMode::Prefer,
    }
}

fn redact_connection_string(conn_str: &str) -> String {
    conn_str
        .rsplit_once('@')
        .map(|(_, host)| format!("postgresql://***@{host}"))
        .unwrap_or_else(|| "postgresql://***".to_string())
}
