//! Bulk FHIR REST client
//!
//! Implements the FHIR Bulk Data `$export` flow over HTTP:
//!
//! 1. `POST {token_url}` with client credentials (HTTP Basic) to get a bearer token
//! 2. `GET {base}/Group/{group}/$export` with `Prefer: respond-async`; the job
//!    status URL comes back in `Content-Location`
//! 3. `GET {job_url}`: `202` while running (`X-Progress`), `200` with the
//!    manifest once complete
//! 4. `GET {result_url}` for each NDJSON result file, streamed

use super::{BulkDataClient, ByteStream};
use crate::config::{ServerConfig, ServerProfile};
use crate::domain::instant::{format_instant, parse_instant};
use crate::domain::{
    BulkDataError, BulkFetchError, ExportGroup, JobStatus, ResourceType, Result, ResultUrls,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, CONTENT_LOCATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::io::StreamReader;

const FHIR_JSON: &str = "application/fhir+json";
const FHIR_NDJSON: &str = "application/fhir+ndjson";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportManifest {
    transaction_time: String,
    #[serde(default)]
    output: Vec<ManifestEntry>,
    #[serde(default)]
    error: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "type")]
    resource_type: String,
    url: String,
}

/// HTTP implementation of [`BulkDataClient`]
///
/// # Example
///
/// ```no_run
/// use bulkfetch::adapters::bulkdata::{BulkDataClient, HttpBulkDataClient};
/// use bulkfetch::config::ServerConfig;
///
/// # async fn example() -> bulkfetch::domain::Result<()> {
/// let mut client = HttpBulkDataClient::new(&ServerConfig::default())?;
/// client.authenticate().await?;
/// # Ok(())
/// # }
/// ```
pub struct HttpBulkDataClient {
    /// Bulk FHIR API base URL
    base_url: String,

    /// OAuth token endpoint
    token_url: String,

    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    profile: ServerProfile,

    /// HTTP client for making requests
    client: Client,

    /// Timeout for non-streaming requests
    request_timeout: Duration,

    /// Bearer token (if authenticated)
    access_token: Option<String>,
}

impl HttpBulkDataClient {
    /// Create a new client from server configuration
    ///
    /// No request is made until [`BulkDataClient::authenticate`] is called.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                BulkFetchError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            base_url: config.api_base_url(),
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config
                .client_secret
                .as_ref()
                .map(|s| s.expose_secret().to_string())
                .unwrap_or_default(),
            scopes: config.auth_scopes.clone(),
            profile: config.profile,
            client,
            request_timeout: config.request_timeout(),
            access_token: None,
        })
    }

    /// Bulk FHIR API base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.access_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn export_url(&self, group: &ExportGroup) -> String {
        format!("{}/Group/{}/$export", self.base_url, group.as_str())
    }
}

#[async_trait]
impl BulkDataClient for HttpBulkDataClient {
    async fn authenticate(&mut self) -> Result<()> {
        let mut form: Vec<(&str, String)> = vec![("grant_type", "client_credentials".to_string())];
        if self.profile == ServerProfile::Generic && !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(ACCEPT, "application/json")
            .form(&form)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                BulkFetchError::Authentication(format!(
                    "token request to {} failed: {e}",
                    self.token_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BulkFetchError::Authentication(format!(
                "token endpoint {} returned {status}: {body}",
                self.token_url
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            BulkFetchError::Authentication(format!("invalid token response: {e}"))
        })?;
        self.access_token = Some(token.access_token);

        tracing::debug!(token_url = %self.token_url, "Authenticated with bulk data server");
        Ok(())
    }

    async fn start_export(
        &self,
        resource_types: &[ResourceType],
        since: Option<DateTime<Utc>>,
        group: &ExportGroup,
    ) -> Result<String> {
        let url = self.export_url(group);
        let types = resource_types
            .iter()
            .map(ResourceType::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let mut query = vec![("_type", types)];
        if let Some(ref ts) = since {
            query.push(("_since", format_instant(ts)));
        }

        let response = self
            .authorized(self.client.get(&url))
            .header(ACCEPT, FHIR_JSON)
            .header("Prefer", "respond-async")
            .query(&query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| BulkFetchError::JobStart(format!("request to {url} failed: {e}")))?;

        if response.status() != StatusCode::ACCEPTED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BulkFetchError::JobStart(format!(
                "{url} returned {status}: {body}"
            )));
        }

        let job_url = response
            .headers()
            .get(CONTENT_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                BulkFetchError::JobStart(format!(
                    "{url} accepted the export but sent no Content-Location header"
                ))
            })?;

        tracing::info!(job_url = %job_url, types = %query[0].1, "Export job started");
        Ok(job_url)
    }

    async fn job_status(&self, job_url: &str) -> Result<JobStatus> {
        let poll_error = |source: BulkDataError| BulkFetchError::StatusPoll {
            job_url: job_url.to_string(),
            source,
        };

        let response = self
            .authorized(self.client.get(job_url))
            .header(ACCEPT, FHIR_JSON)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| poll_error(BulkDataError::Transport(e.to_string())))?;

        match response.status() {
            StatusCode::ACCEPTED => {
                let progress = response
                    .headers()
                    .get("X-Progress")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_progress);
                Ok(JobStatus::in_progress(progress))
            }
            StatusCode::OK => {
                let manifest: ExportManifest = response.json().await.map_err(|e| {
                    poll_error(BulkDataError::InvalidResponse(format!(
                        "unreadable export manifest: {e}"
                    )))
                })?;
                manifest_to_status(manifest).map_err(poll_error)
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Ok(JobStatus::failed(format!(
                    "job status returned {status}: {body}"
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(poll_error(BulkDataError::from_status(status.as_u16(), body)))
            }
        }
    }

    async fn download(&self, url: &str) -> std::result::Result<ByteStream, BulkDataError> {
        let response = self
            .authorized(self.client.get(url))
            .header(ACCEPT, FHIR_NDJSON)
            .send()
            .await
            .map_err(|e| BulkDataError::Transport(e.to_string()))?;

        let response = check_status(response).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }
}

async fn check_status(response: Response) -> std::result::Result<Response, BulkDataError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BulkDataError::from_status(status.as_u16(), body))
}

fn manifest_to_status(manifest: ExportManifest) -> std::result::Result<JobStatus, BulkDataError> {
    let transaction_time = parse_instant(&manifest.transaction_time)
        .map_err(|e| BulkDataError::InvalidResponse(e.to_string()))?;

    let mut result_urls = ResultUrls::new();
    for entry in manifest.output {
        let resource_type = ResourceType::new(entry.resource_type)
            .map_err(|e| BulkDataError::InvalidResponse(format!("manifest output: {e}")))?;
        result_urls.entry(resource_type).or_default().push(entry.url);
    }

    if !manifest.error.is_empty() {
        tracing::warn!(
            error_files = manifest.error.len(),
            "Export manifest lists OperationOutcome error files"
        );
    }

    Ok(JobStatus::complete(result_urls, transaction_time))
}

/// Extract a percentage from an `X-Progress` header ("40%", "in progress (40%)")
fn parse_progress(value: &str) -> Option<u8> {
    let end = value.find('%')?;
    let digits: String = value[..end]
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse::<u8>().ok().filter(|p| *p <= 100)
}
