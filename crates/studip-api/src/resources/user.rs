//! User resource.

use crate::client::StudIpClient;
use crate::error::ApiError;
use crate::http_client::HttpClient;
use crate::models::User;

/// Operations on the authenticated user.
pub struct UserResource<'c, C: HttpClient> {
    client: &'c StudIpClient<C>,
}

impl<'c, C: HttpClient> UserResource<'c, C> {
    pub(crate) fn new(client: &'c StudIpClient<C>) -> Self {
        Self { client }
    }

    /// Fetch the authenticated user.
    pub async fn get(&self) -> Result<User, ApiError> {
        self.client.inner.get_json("user", &[]).await
    }
}
