//! Folders resource.

use crate::client::StudIpClient;
use crate::error::ApiError;
use crate::http_client::HttpClient;
use crate::models::Folder;

/// Operations on folders.
pub struct FoldersResource<'c, C: HttpClient> {
    client: &'c StudIpClient<C>,
}

impl<'c, C: HttpClient> FoldersResource<'c, C> {
    pub(crate) fn new(client: &'c StudIpClient<C>) -> Self {
        Self { client }
    }

    /// Fetch the top folder of a course's file area.
    pub async fn top_folder(&self, course_id: &str) -> Result<Folder, ApiError> {
        self.client
            .inner
            .get_json(&format!("course/{course_id}/top_folder"), &[])
            .await
    }

    /// Fetch a folder with its immediate children.
    pub async fn get(&self, folder_id: &str) -> Result<Folder, ApiError> {
        self.client
            .inner
            .get_json(&format!("folder/{folder_id}"), &[])
            .await
    }
}
