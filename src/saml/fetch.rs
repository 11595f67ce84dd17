//! IdP metadata retrieval.

use async_trait::async_trait;
use reqwest::header::USER_AGENT as USER_AGENT_HEADER;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// `User-Agent` sent with metadata requests. Some IdPs (OneLogin among them)
/// answer 403 to clients that do not identify themselves.
pub const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (+rust; reqwest)"
);

/// Total fetch attempts before giving up (initial request plus 10 retries).
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 11;

/// Delay between fetch attempts.
pub const DEFAULT_FETCH_DELAY: Duration = Duration::from_secs(5);

/// A single failed metadata fetch. All variants are retryable.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Source of raw IdP metadata documents.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetch the document at `url`, returning the full body.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// Fetches metadata over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpMetadataFetcher {
    client: reqwest::Client,
}

impl HttpMetadataFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetcher with a 30 second request timeout.
    pub fn with_default_client() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        debug!(url = %url, "Fetching IdP metadata");

        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT_HEADER, USER_AGENT)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.bytes().await.map_err(FetchError::Body)?;
        Ok(body.to_vec())
    }
}

/// How many times, and how often, to retry the metadata fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
    /// Upper bound on the whole fetch loop, waits included.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_FETCH_ATTEMPTS,
            delay: DEFAULT_FETCH_DELAY,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based).
    pub fn delay_for(&self, _attempt: u32) -> Duration {
        self.delay
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
