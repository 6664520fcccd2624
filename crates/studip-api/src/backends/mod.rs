//! HTTP client backend implementations.

mod reqwest_client;

pub use reqwest_client::{ReqwestClient, Timeouts};
