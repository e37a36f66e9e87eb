//! Replaying captured requests against the retail API.

use std::time::Duration;

use async_trait::async_trait;
use orderwatch_protocol::CapturedRequest;
use reqwest::{Client, Method};
use thiserror::Error;
use tracing::debug;

/// Default bound on a single replay request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from a replay request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No response within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Any other client-side failure.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("server returned status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connection(err.to_string())
        } else {
            FetchError::Http(err.to_string())
        }
    }
}

/// Source of response bodies for the scheduled path.
#[async_trait]
pub trait ObservationFetcher: Send + Sync {
    /// Issues `request` and returns the raw response body.
    async fn fetch(&self, request: &CapturedRequest) -> Result<String, FetchError>;
}

/// Re-issues the captured request over HTTP.
#[derive(Debug, Clone)]
pub struct HttpReplayer {
    client: Client,
}

impl HttpReplayer {
    /// Builds a replayer whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Uses a preconfigured client (proxy settings, TLS roots).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObservationFetcher for HttpReplayer {
    async fn fetch(&self, request: &CapturedRequest) -> Result<String, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::Http(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in request.replay_headers() {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        debug!(url = %request.url, bytes = body.len(), "Replay response received");
        Ok(body)
    }
}
