use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, RawItem};
use crate::shutdown::Shutdown;

/// Hard ceiling on a single fetch, whatever the configuration asks for.
pub const MAX_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
pub const DEFAULT_USER_AGENT: &str = concat!("feedmill/", env!("CARGO_PKG_VERSION"));

/// Why a feed could not be fetched.
///
/// Every variant means the same thing to the pipeline: the feed is
/// unavailable this cycle and is retried at its next due time.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Document could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Shutdown was signalled while the request was in flight
    #[error("Fetch cancelled by shutdown")]
    Cancelled,
}

/// Source of raw feed items.
///
/// The pipeline only talks to this trait, so ingestion can run against an
/// instrumented source in tests.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the document at `url`.
    ///
    /// A valid feed with no items is `Ok(vec![])`, not an error.
    async fn fetch(&self, url: &str, shutdown: &Shutdown) -> Result<Vec<RawItem>, FetchError>;
}

/// HTTP feed fetcher: one GET per call, no retries, no caching.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl Fetcher {
    /// Build a fetcher with its own HTTP client.
    ///
    /// `timeout` is clamped to [`MAX_FETCH_TIMEOUT`].
    pub fn new(timeout: Duration, max_bytes: usize, user_agent: &str) -> Result<Self, FetchError> {
        let timeout = timeout.min(MAX_FETCH_TIMEOUT);
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, timeout, max_bytes))
    }

    /// Wrap an existing client (allows custom configuration)
    pub fn with_client(client: reqwest::Client, timeout: Duration, max_bytes: usize) -> Self {
        Self {
            client,
            timeout: timeout.min(MAX_FETCH_TIMEOUT),
            max_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_document(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_bytes).await
    }
}

#[async_trait]
impl FeedSource for Fetcher {
    async fn fetch(&self, url: &str, shutdown: &Shutdown) -> Result<Vec<RawItem>, FetchError> {
        let request = async {
            let bytes = self.fetch_document(url).await?;
            parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
        };

        tokio::select! {
            biased;
            _ = shutdown.wait() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(self.timeout, request) => match result {
                Ok(items) => items,
                Err(_) => Err(FetchError::Timeout),
            },
        }
    }
}

fn map_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
