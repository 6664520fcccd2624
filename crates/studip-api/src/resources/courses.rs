//! Courses resource.

use std::sync::Arc;

use crate::client::StudIpClient;
use crate::http_client::HttpClient;
use crate::models::Course;
use crate::pagination::PageStream;

/// Operations on a user's courses.
pub struct CoursesResource<C: HttpClient> {
    inner: Arc<crate::client::ClientInner<C>>,
}

impl<C: HttpClient> CoursesResource<C> {
    pub(crate) fn new(client: &StudIpClient<C>) -> Self {
        Self {
            inner: Arc::clone(&client.inner),
        }
    }

    /// List all courses of `user_id`, across all semesters.
    #[must_use]
    pub fn list(&self, user_id: &str) -> PageStream<C, Course> {
        PageStream::new(
            Arc::clone(&self.inner),
            format!("user/{user_id}/courses"),
            Vec::new(),
        )
    }
}
