//! Offset-based pagination support.
//!
//! Stud.IP collection routes wrap their items in a `{ collection, pagination }`
//! envelope with `total`/`offset`/`limit` counters. [`PageStream`] lazily pulls
//! pages and hands out individual items.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::client::ClientInner;
use crate::error::ApiError;
use crate::http_client::HttpClient;
use crate::models::Page;

const PAGE_LIMIT: u64 = 50;

/// An async page stream that lazily fetches pages from a paginated endpoint.
///
/// Owns all its state (via `Arc`) so there are no lifetime parameters.
pub struct PageStream<C: HttpClient, T: DeserializeOwned> {
    inner: Arc<ClientInner<C>>,
    path: String,
    extra_query: Vec<(&'static str, String)>,
    offset: u64,
    buffer: VecDeque<T>,
    done: bool,
}

impl<C: HttpClient, T: DeserializeOwned> PageStream<C, T> {
    pub(crate) fn new(
        inner: Arc<ClientInner<C>>,
        path: String,
        extra_query: Vec<(&'static str, String)>,
    ) -> Self {
        Self {
            inner,
            path,
            extra_query,
            offset: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Fetch the next individual item, requesting new pages as needed.
    ///
    /// Returns `Ok(None)` when all pages have been exhausted.
    pub async fn next(&mut self) -> Result<Option<T>, ApiError> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(Some(item));
        }
        if self.done {
            return Ok(None);
        }

        let mut query = self.extra_query.clone();
        query.push(("offset", self.offset.to_string()));
        query.push(("limit", PAGE_LIMIT.to_string()));

        let page: Page = self.inner.get_json(&self.path, &query).await?;
        let items = collection_items(page.collection)?;
        self.offset = page.pagination.offset + items.len() as u64;
        self.done = items.is_empty() || self.offset >= page.pagination.total;
        self.buffer = items.into();
        Ok(self.buffer.pop_front())
    }

    /// Drain the stream into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}

/// Decode a `collection` value. Most routes return a map keyed by item URL;
/// some return a plain array.
fn collection_items<T: DeserializeOwned>(collection: serde_json::Value) -> Result<Vec<T>, ApiError> {
    let values: Vec<serde_json::Value> = match collection {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map.into_values().collect(),
        other => {
            return Err(ApiError::Parse(format!(
                "collection is neither array nor object: {other}"
            )));
        }
    };
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(ApiError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_items_accepts_arrays_and_maps() {
        let arr = serde_json::json!([1, 2, 3]);
        let items: Vec<u64> = collection_items(arr).expect("array");
        assert_eq!(items, vec![1, 2, 3]);

        let map = serde_json::json!({"/a": 1, "/b": 2});
        let mut items: Vec<u64> = collection_items(map).expect("map");
        items.sort_unstable();
        assert_eq!(items, vec![1, 2]);

        let bad = serde_json::json!("nope");
        assert!(collection_items::<u64>(bad).is_err());
    }
}
