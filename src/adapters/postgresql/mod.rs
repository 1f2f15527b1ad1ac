//! PostgreSQL output
//!
//! Records are stored as JSONB rows in `fhir_resources`, keyed by
//! `(resource_type, resource_id)` so repeated deliveries overwrite.

pub mod client;
pub mod models;
pub mod sink;

pub use client::PostgreSQLClient;
pub use models::FhirResourceRow;
pub use sink::PostgresSink;
