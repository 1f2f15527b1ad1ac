//! Healthcare API FHIR store client
//!
//! Covers the calls the FHIR store sink makes:
//!
//! - `PUT {store}/fhir/{type}/{id}` (or `POST {store}/fhir/{type}` without an id)
//! - `POST {store}/fhir` with a `batch` Bundle
//! - `POST {store}:import` from a Cloud Storage prefix, then `GET {operation}`

use crate::config::FhirStoreConfig;
use crate::domain::{BulkFetchError, ResourceType, Result};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json;charset=utf-8";

/// State of a long-running import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running
    Running,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

/// REST client for one FHIR store
#[derive(Clone)]
pub struct FhirStoreClient {
    client: Client,
    endpoint: String,
    store_path: String,
    access_token: Option<String>,
}

impl FhirStoreClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &FhirStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| {
                BulkFetchError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            store_path: config.store_path(),
            access_token: config
                .access_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
        })
    }

    fn fhir_base(&self) -> String {
        format!("{}/{}/fhir", self.endpoint, self.store_path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.access_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Create or update one resource
    ///
    /// Resources with an `id` are written with `PUT` so re-runs overwrite
    /// rather than duplicate.
    ///
    /// # Errors
    ///
    /// Returns a sink error carrying the store's response on failure.
    pub async fn upload_resource(
        &self,
        resource_type: &ResourceType,
        payload: Bytes,
    ) -> Result<()> {
        let request = match resource_id(&payload) {
            Some(id) => self
                .client
                .put(format!("{}/{}/{}", self.fhir_base(), resource_type, id)),
            None => self
                .client
                .post(format!("{}/{}", self.fhir_base(), resource_type)),
        };

        let response = self
            .authorized(request)
            .header(CONTENT_TYPE, FHIR_JSON)
            .body(payload)
            .send()
            .await
            .map_err(|e| BulkFetchError::sink("fhir_store", format!("upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BulkFetchError::sink(
                "fhir_store",
                format!("upload of {resource_type} returned {status}: {body}"),
            ));
        }
        Ok(())
    }

    /// Upload resources as one `batch` Bundle
    ///
    /// Returns one entry per input, `None` for success or the error message.
    ///
    /// # Errors
    ///
    /// Returns a sink error if the bundle as a whole is rejected.
    pub async fn upload_batch(
        &self,
        resources: &[(ResourceType, Bytes)],
    ) -> Result<Vec<Option<String>>> {
        let bundle = batch_bundle(resources)?;

        let response = self
            .authorized(self.client.post(self.fhir_base()))
            .header(CONTENT_TYPE, FHIR_JSON)
            .body(serde_json::to_vec(&bundle)?)
            .send()
            .await
            .map_err(|e| BulkFetchError::sink("fhir_store", format!("batch upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BulkFetchError::sink(
                "fhir_store",
                format!("batch upload returned {status}: {body}"),
            ));
        }

        let body: Value = response.json().await.map_err(|e| {
            BulkFetchError::sink("fhir_store", format!("unreadable batch response: {e}"))
        })?;
        Ok(batch_outcomes(&body, resources.len()))
    }

    /// Start an import of every NDJSON object under `gcs_uri`
    ///
    /// Returns the long-running operation name.
    ///
    /// # Errors
    ///
    /// Returns a sink error if the import is not accepted.
    pub async fn import_from_gcs(&self, gcs_uri: &str) -> Result<String> {
        let url = format!("{}/{}:import", self.endpoint, self.store_path);
        let request = json!({
            "contentStructure": "RESOURCE",
            "gcsSource": { "uri": gcs_uri },
        });

        let response = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                BulkFetchError::sink("fhir_store", format!("import request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BulkFetchError::sink(
                "fhir_store",
                format!("import from {gcs_uri} returned {status}: {body}"),
            ));
        }

        let operation: Operation = response.json().await.map_err(|e| {
            BulkFetchError::sink("fhir_store", format!("unreadable import response: {e}"))
        })?;
        if operation.name.is_empty() {
            return Err(BulkFetchError::sink(
                "fhir_store",
                "import response has no operation name",
            ));
        }
        Ok(operation.name)
    }

    /// Poll a long-running operation
    ///
    /// # Errors
    ///
    /// Returns a sink error if the operation cannot be read.
    pub async fn operation_status(&self, name: &str) -> Result<OperationStatus> {
        let url = format!("{}/{}", self.endpoint, name);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| {
                BulkFetchError::sink("fhir_store", format!("operation poll failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BulkFetchError::sink(
                "fhir_store",
                format!("operation {name} returned {status}: {body}"),
            ));
        }

        let operation: Operation = response.json().await.map_err(|e| {
            BulkFetchError::sink("fhir_store", format!("unreadable operation: {e}"))
        })?;
        Ok(match (operation.done, operation.error) {
            (_, Some(error)) => OperationStatus::Failed(error.message),
            (true, None) => OperationStatus::Done,
            (false, None) => OperationStatus::Running,
        })
    }
}

/// The `id` of a FHIR resource, if it has one
pub(crate) fn resource_id(payload: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct IdOnly {
        id: Option<String>,
    }
    serde_json::from_slice::<IdOnly>(payload)
        .ok()
        .and_then(|r| r.id)
        .filter(|id| !id.is_empty())
}

fn batch_bundle(resources: &[(ResourceType, Bytes)]) -> Result<Value> {
    let mut entries = Vec::with_capacity(resources.len());
    for (resource_type, payload) in resources {
        let resource: Value = serde_json::from_slice(payload)?;
        let request = match resource_id(payload) {
            Some(id) => json!({ "method": "PUT", "url": format!("{resource_type}/{id}") }),
            None => json!({ "method": "POST", "url": resource_type.as_str() }),
        };
        entries.push(json!({ "resource": resource, "request": request }));
    }
    Ok(json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": entries,
    }))
}

fn batch_outcomes(response: &Value, expected: usize) -> Vec<Option<String>> {
    let entries = response
        .get("entry")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    (0..expected)
        .map(|i| {
            let Some(entry) = entries.get(i) else {
                return Some("no response entry for resource".to_string());
            };
            let status = entry
                .pointer("/response/status")
                .and_then(Value::as_str)
                .unwrap_or("");
            if status.starts_with('2') {
                None
            } else {
                let outcome = entry
                    .pointer("/response/outcome")
                    .map(Value::to_string)
                    .unwrap_or_default();
                Some(format!("status '{status}' {outcome}").trim_end().to_string())
            }
        })
        .collect()
}
