//! Rust SDK for the Stud.IP REST API.
//!
//! The crate exposes a thin typed layer over the JSON endpoints a course
//! filesystem needs: discovery, user, settings, semesters, courses, folders,
//! files and file downloads. Transport is pluggable through [`HttpClient`];
//! a reqwest-backed implementation ships in [`backends`].

pub mod backends;
mod client;
pub mod error;
mod http_client;
pub mod models;
mod pagination;
pub mod resources;

pub use client::{DEFAULT_MAX_CONNECTIONS, REQUIRED_ENDPOINTS, StudIpClient, StudIpClientBuilder};
pub use error::{ApiError, HttpClientError};
pub use http_client::{HttpClient, HttpRequest, HttpResponse};
pub use pagination::PageStream;
