//! File references resource.

use crate::client::StudIpClient;
use crate::error::ApiError;
use crate::http_client::HttpClient;
use crate::models::FileRef;

/// Operations on file references.
pub struct FilesResource<'c, C: HttpClient> {
    client: &'c StudIpClient<C>,
}

impl<'c, C: HttpClient> FilesResource<'c, C> {
    pub(crate) fn new(client: &'c StudIpClient<C>) -> Self {
        Self { client }
    }

    /// Fetch a file reference's metadata.
    pub async fn get(&self, file_ref_id: &str) -> Result<FileRef, ApiError> {
        self.client
            .inner
            .get_json(&format!("file/{file_ref_id}"), &[])
            .await
    }
}
