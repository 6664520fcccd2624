//! Semesters resource.

use std::sync::Arc;

use crate::client::StudIpClient;
use crate::http_client::HttpClient;
use crate::models::Semester;
use crate::pagination::PageStream;

/// Operations on semesters.
pub struct SemestersResource<C: HttpClient> {
    inner: Arc<crate::client::ClientInner<C>>,
}

impl<C: HttpClient> SemestersResource<C> {
    pub(crate) fn new(client: &StudIpClient<C>) -> Self {
        Self {
            inner: Arc::clone(&client.inner),
        }
    }

    /// List all semesters known to the server.
    #[must_use]
    pub fn list(&self) -> PageStream<C, Semester> {
        PageStream::new(Arc::clone(&self.inner), "semesters".to_owned(), Vec::new())
    }
}
