//! Watermark persistence
//!
//! See [`TransactionTimeStore`].

pub mod store;

pub use store::{InMemoryStore, LocalFileStore, ObjectStore, TransactionTimeStore};
