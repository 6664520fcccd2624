//! Discovery resource.

use crate::client::StudIpClient;
use crate::error::ApiError;
use crate::http_client::HttpClient;
use crate::models::Discovery;

/// Operations on the discovery document.
pub struct DiscoveryResource<'c, C: HttpClient> {
    client: &'c StudIpClient<C>,
}

impl<'c, C: HttpClient> DiscoveryResource<'c, C> {
    pub(crate) fn new(client: &'c StudIpClient<C>) -> Self {
        Self { client }
    }

    /// Fetch the route map advertised by the server.
    pub async fn get(&self) -> Result<Discovery, ApiError> {
        self.client.inner.get_json("discovery", &[]).await
    }
}
