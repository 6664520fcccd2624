//! HTTP client abstraction for pluggable backends.

use std::future::Future;
use std::path::Path;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::error::HttpClientError;

/// An HTTP request to be sent by an [`HttpClient`] implementation.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: Method,
    /// The fully-qualified URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
}

/// An HTTP response returned by an [`HttpClient`] implementation.
#[derive(Debug)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body bytes.
    pub body: Bytes,
}

/// Trait for pluggable HTTP client backends.
///
/// Uses native `impl Future` in traits (RPITIT) — no `async-trait` macro
/// required.
pub trait HttpClient: Send + Sync {
    /// Send an HTTP request and return the buffered response.
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, HttpClientError>> + Send;

    /// Send an HTTP request and stream the response body to `dest`,
    /// returning the number of bytes written.
    ///
    /// Implementations must not buffer the whole body in memory; bodies may
    /// be large file downloads.
    fn send_to_file(
        &self,
        request: HttpRequest,
        dest: &Path,
    ) -> impl Future<Output = Result<u64, HttpClientError>> + Send;
}
