//! Error types for the Stud.IP SDK.

use thiserror::Error;

/// Transport-level failures produced by an [`crate::HttpClient`] backend.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A streaming download answered with a non-success status code.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// Local I/O failed while streaming a body to disk.
    #[error("body I/O failed: {0}")]
    BodyIo(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("http client error: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Failures of a single API request.
///
/// This is the per-request error surface the crawler consumes; everything the
/// server or the transport can do wrong collapses into one of these variants.
/// `Clone` because a cached failure is replayed to every later consumer of
/// the same request key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request timed out. Idempotent GETs may be retried once by callers.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status code.
    #[error("server returned HTTP status {0}")]
    HttpStatus(u16),

    /// The transport failed below the HTTP layer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The response body could not be decoded.
    #[error("could not parse response: {0}")]
    Parse(String),

    /// A required endpoint is absent from the discovery document.
    #[error("endpoint missing from discovery: {0}")]
    EndpointMissing(String),

    /// The server rejected the configured credentials.
    #[error("authentication rejected")]
    Auth,
}

impl From<HttpClientError> for ApiError {
    fn from(e: HttpClientError) -> Self {
        match e {
            HttpClientError::Timeout => Self::Timeout,
            HttpClientError::Connection(msg) => Self::Protocol(msg),
            HttpClientError::UnexpectedStatus(401 | 403) => Self::Auth,
            HttpClientError::UnexpectedStatus(code) => Self::HttpStatus(code),
            HttpClientError::BodyIo(io) => Self::Protocol(io.to_string()),
            HttpClientError::Other(other) => Self::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
