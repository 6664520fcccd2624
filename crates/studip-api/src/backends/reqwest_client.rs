//! Reqwest-based HTTP client backend.

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt as _;

use crate::error::HttpClientError;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};

/// Per-request timeout knobs, applied when building the underlying client.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Time allowed for establishing a TCP connection.
    pub connect: Duration,
    /// Total time allowed for a request/response exchange.
    pub read: Duration,
    /// How long idle pooled connections are kept alive.
    pub keepalive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(30),
            keepalive: Duration::from_secs(60),
        }
    }
}

/// An [`HttpClient`] implementation backed by [`reqwest`].
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a new `ReqwestClient` with the given timeouts.
    #[must_use]
    pub fn new(timeouts: Timeouts) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.read)
            .pool_idle_timeout(timeouts.keepalive)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Create a `ReqwestClient` from an existing [`reqwest::Client`].
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn start(&self, request: HttpRequest) -> Result<reqwest::Response, HttpClientError> {
        self.client
            .request(request.method, &request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(map_reqwest_error)
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new(Timeouts::default())
    }
}

impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let response = self.start(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_to_file(
        &self,
        request: HttpRequest,
        dest: &Path,
    ) -> Result<u64, HttpClientError> {
        let mut response = self.start(request).await?;
        if !response.status().is_success() {
            return Err(HttpClientError::UnexpectedStatus(response.status().as_u16()));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Map a reqwest error to our [`HttpClientError`].
fn map_reqwest_error(err: reqwest::Error) -> HttpClientError {
    if err.is_timeout() {
        HttpClientError::Timeout
    } else if err.is_connect() {
        HttpClientError::Connection(err.to_string())
    } else {
        HttpClientError::Other(Box::new(err))
    }
}
