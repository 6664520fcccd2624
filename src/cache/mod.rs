//! Persistent caching of downloaded file contents.

mod content;

pub use content::{CacheError, CachedFile, ContentCache, FetchContents, Fingerprint};
