//! Cloud Storage JSON API client
//!
//! Just enough of the Storage API for bulkfetch: read a whole object, write a
//! whole object. Used by the `gs://` checkpoint store and by the FHIR store's
//! GCS-mediated import.

use crate::config::GcsConfig;
use crate::domain::{BulkFetchError, Result};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use std::fmt;
use std::time::Duration;
use url::Url;

/// A `gs://bucket/object` location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsPath {
    /// Bucket name
    pub bucket: String,
    /// Object name (may contain `/`)
    pub object: String,
}

impl GcsPath {
    /// Parse a `gs://bucket/object` URI
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the scheme, bucket or object is missing.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix("gs://").ok_or_else(|| {
            BulkFetchError::Configuration(format!("'{uri}' is not a gs:// URI"))
        })?;
        match rest.split_once('/') {
            Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                object: object.to_string(),
            }),
            _ => Err(BulkFetchError::Configuration(format!(
                "'{uri}' must look like gs://<bucket>/<object>"
            ))),
        }
    }
}

impl fmt::Display for GcsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

/// Minimal Cloud Storage client
#[derive(Clone)]
pub struct GcsClient {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
}

impl GcsClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &GcsConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                BulkFetchError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token: config
                .access_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
        })
    }

    fn object_url(&self, path: &GcsPath) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| BulkFetchError::Configuration(format!("invalid gcs.endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| BulkFetchError::Configuration("invalid gcs.endpoint".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", path.bucket.as_str(), "o", path.object.as_str()]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    fn upload_url(&self, path: &GcsPath) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| BulkFetchError::Configuration(format!("invalid gcs.endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| BulkFetchError::Configuration("invalid gcs.endpoint".to_string()))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", path.bucket.as_str(), "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &path.object);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.access_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Read a whole object; `None` if it does not exist
    ///
    /// # Errors
    ///
    /// Returns a storage error for transport failures and any status other
    /// than 200 or 404.
    pub async fn read_object(&self, path: &GcsPath) -> Result<Option<Bytes>> {
        let url = self.object_url(path)?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| BulkFetchError::Storage(format!("reading {path} failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| BulkFetchError::Storage(format!("reading {path} failed: {e}")))?;
                Ok(Some(body))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BulkFetchError::Storage(format!(
                    "reading {path} returned {status}: {body}"
                )))
            }
        }
    }

    /// Create or replace a whole object
    ///
    /// # Errors
    ///
    /// Returns a storage error if the upload is not acknowledged.
    pub async fn write_object(
        &self,
        path: &GcsPath,
        content_type: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<()> {
        let url = self.upload_url(path)?;
        let response = self
            .authorized(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| BulkFetchError::Storage(format!("writing {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BulkFetchError::Storage(format!(
                "writing {path} returned {status}: {body}"
            )));
        }

        tracing::debug!(object = %path, "Wrote Cloud Storage object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gs_path() {
        let path = GcsPath::parse("gs://my-bucket/since/bcda.txt").unwrap();
        assert_eq!(path.bucket, "my-bucket");
        assert_eq!(path.object, "since/bcda.txt");
        assert_eq!(path.to_string(), "gs://my-bucket/since/bcda.txt");
    }

    #[test]
    fn test_parse_gs_path_rejects_bad_uris() {
        assert!(GcsPath::parse("/local/file").is_err());
        assert!(GcsPath::parse("gs://bucket").is_err());
        assert!(GcsPath::parse("gs:///object").is_err());
    }

    #[test]
    fn test_object_names_are_percent_encoded() {
        let client = GcsClient::new(&GcsConfig::default()).unwrap();
        let path = GcsPath::parse("gs://bucket/dir/since.txt").unwrap();
        assert_eq!(
            client.object_url(&path).unwrap().as_str(),
            "https://storage.googleapis.com/storage/v1/b/bucket/o/dir%2Fsince.txt?alt=media"
        );
        assert_eq!(
            client.upload_url(&path).unwrap().as_str(),
            "https://storage.googleapis.com/upload/storage/v1/b/bucket/o?uploadType=media&name=dir%2Fsince.txt"
        );
    }
}
