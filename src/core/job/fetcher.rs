//! Result file download with re-authentication
//!
//! A download failing as unauthorized, with a retryable status (429, 5xx), or
//! at the transport level is retried after a fixed backoff and a fresh
//! `authenticate`, up to [`MAX_FETCH_RETRIES`] times. Servers sometimes answer
//! an expired token with a 5xx, so every retryable failure re-authenticates.

use crate::adapters::bulkdata::{BulkDataClient, ByteStream};
use crate::domain::{FetchError, Result};
use crate::log_retry_attempt;
use std::time::Duration;

/// Retries after the first failed attempt
pub const MAX_FETCH_RETRIES: usize = 5;

/// Sleep before each re-authentication
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_secs(2);

/// Download policy for result files
#[derive(Debug, Clone)]
pub struct ResilientFetcher {
    backoff: Duration,
    max_retries: usize,
}

impl Default for ResilientFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_BACKOFF)
    }
}

impl ResilientFetcher {
    /// Fetcher with the standard retry budget and the given backoff
    pub fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            max_retries: MAX_FETCH_RETRIES,
        }
    }

    /// Open `url` for streaming
    ///
    /// Takes the client mutably because retries refresh its credentials.
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::BulkFetchError::Fetch`] with the last
    /// underlying error once the failure is non-retryable or the retries are
    /// used up, or the authentication error if re-authenticating fails.
    pub async fn fetch(&self, client: &mut dyn BulkDataClient, url: &str) -> Result<ByteStream> {
        let mut retries = 0;
        loop {
            match client.download(url).await {
                Ok(stream) => {
                    if retries > 0 {
                        tracing::info!(url = %url, retries, "Download succeeded after retrying");
                    }
                    return Ok(stream);
                }
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    log_retry_attempt!(url, retries, self.max_retries, e);
                    tokio::time::sleep(self.backoff).await;
                    client.authenticate().await?;
                }
                Err(e) => {
                    return Err(FetchError {
                        url: url.to_string(),
                        attempts: retries + 1,
                        source: e,
                    }
                    .into());
                }
            }
        }
    }
}
