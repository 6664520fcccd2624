//! Settings resource.

use crate::client::StudIpClient;
use crate::error::ApiError;
use crate::http_client::HttpClient;
use crate::models::Settings;

/// Operations on global Stud.IP settings.
pub struct SettingsResource<'c, C: HttpClient> {
    client: &'c StudIpClient<C>,
}

impl<'c, C: HttpClient> SettingsResource<'c, C> {
    pub(crate) fn new(client: &'c StudIpClient<C>) -> Self {
        Self { client }
    }

    /// Fetch the `SEM_TYPE` / `SEM_CLASS` tables.
    pub async fn get(&self) -> Result<Settings, ApiError> {
        self.client.inner.get_json("studip/settings", &[]).await
    }
}
