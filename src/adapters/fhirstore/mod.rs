//! Healthcare API FHIR store output

pub mod client;
pub mod sink;

pub use client::{FhirStoreClient, OperationStatus};
pub use sink::{FhirStoreSink, UploadFailure};
