//! The Stud.IP API client.

use std::path::Path;
use std::sync::Arc;

use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderMap, HeaderValue, Method};
use secrecy::{ExposeSecret as _, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::backends::ReqwestClient;
use crate::error::ApiError;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::models::User;
use crate::resources::{
    CoursesResource, DiscoveryResource, FilesResource, FoldersResource, SemestersResource,
    SettingsResource, UserResource,
};

/// Default bound on concurrently in-flight requests.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// The endpoints a mount needs; verified against discovery at startup.
pub const REQUIRED_ENDPOINTS: &[&str] = &[
    "/discovery",
    "/user",
    "/studip/settings",
    "/semesters",
    "/user/:user_id/courses",
    "/course/:course_id/top_folder",
    "/folder/:folder_id",
    "/file/:file_ref_id",
    "/file/:file_ref_id/download",
];

pub(crate) struct ClientInner<C: HttpClient> {
    pub(crate) http: C,
    base_url: String,
    headers: HeaderMap,
    /// Bounds crawl fan-out: no more than this many requests in flight.
    limiter: Semaphore,
}

impl<C: HttpClient> ClientInner<C> {
    pub(crate) fn url_for(&self, path: &str, query: &[(&str, String)]) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        for (i, (key, value)) in query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            url.push(sep);
            url.push_str(key);
            url.push('=');
            url.push_str(value);
        }
        url
    }

    pub(crate) async fn get(&self, url: String) -> Result<HttpResponse, ApiError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ApiError::Protocol("request limiter closed".to_owned()))?;
        debug!(%url, "GET");
        let response = self
            .http
            .send(HttpRequest {
                method: Method::GET,
                url,
                headers: self.headers.clone(),
            })
            .await?;

        match response.status.as_u16() {
            200..=299 => Ok(response),
            401 | 403 => Err(ApiError::Auth),
            code => Err(ApiError::HttpStatus(code)),
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self.get(self.url_for(path, query)).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

/// Client for the Stud.IP REST API.
///
/// Cheap to clone; all clones share one connection pool and one request
/// limiter.
pub struct StudIpClient<C: HttpClient = ReqwestClient> {
    pub(crate) inner: Arc<ClientInner<C>>,
}

impl<C: HttpClient> Clone for StudIpClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl StudIpClient<ReqwestClient> {
    /// Start building a client with the default reqwest backend.
    #[must_use]
    pub fn builder() -> StudIpClientBuilder<ReqwestClient> {
        StudIpClientBuilder::new(ReqwestClient::default())
    }
}

impl<C: HttpClient> StudIpClient<C> {
    /// Verify credentials and endpoint availability.
    ///
    /// Fetches `/user` (must match `expected_username`) and `/discovery`
    /// (must carry GET for every endpoint in [`REQUIRED_ENDPOINTS`]).
    /// Fails fast with [`ApiError::Auth`] or [`ApiError::EndpointMissing`].
    #[instrument(skip(self))]
    pub async fn open_session(&self, expected_username: &str) -> Result<User, ApiError> {
        let user = self.user().get().await?;
        if user.username != expected_username {
            return Err(ApiError::Auth);
        }

        let discovery = self.discovery().get().await?;
        for endpoint in REQUIRED_ENDPOINTS {
            if !discovery.supports_get(endpoint) {
                return Err(ApiError::EndpointMissing((*endpoint).to_owned()));
            }
        }
        Ok(user)
    }

    /// Stream the contents of a file to `dest`, returning the byte count.
    pub async fn download_to(&self, file_id: &str, dest: &Path) -> Result<u64, ApiError> {
        let _permit = self
            .inner
            .limiter
            .acquire()
            .await
            .map_err(|_| ApiError::Protocol("request limiter closed".to_owned()))?;
        let url = self.inner.url_for(&format!("file/{file_id}/download"), &[]);
        debug!(%url, "GET (streaming)");
        let written = self
            .inner
            .http
            .send_to_file(
                HttpRequest {
                    method: Method::GET,
                    url,
                    headers: self.inner.headers.clone(),
                },
                dest,
            )
            .await?;
        Ok(written)
    }

    /// Operations on the discovery document.
    #[must_use]
    pub fn discovery(&self) -> DiscoveryResource<'_, C> {
        DiscoveryResource::new(self)
    }

    /// Operations on the authenticated user.
    #[must_use]
    pub fn user(&self) -> UserResource<'_, C> {
        UserResource::new(self)
    }

    /// Operations on global settings.
    #[must_use]
    pub fn settings(&self) -> SettingsResource<'_, C> {
        SettingsResource::new(self)
    }

    /// Operations on semesters.
    #[must_use]
    pub fn semesters(&self) -> SemestersResource<C> {
        SemestersResource::new(self)
    }

    /// Operations on a user's courses.
    #[must_use]
    pub fn courses(&self) -> CoursesResource<C> {
        CoursesResource::new(self)
    }

    /// Operations on folders.
    #[must_use]
    pub fn folders(&self) -> FoldersResource<'_, C> {
        FoldersResource::new(self)
    }

    /// Operations on file references.
    #[must_use]
    pub fn files(&self) -> FilesResource<'_, C> {
        FilesResource::new(self)
    }
}

/// Builder for [`StudIpClient`].
pub struct StudIpClientBuilder<C: HttpClient> {
    http: C,
    base_url: String,
    username: String,
    password: Option<SecretString>,
    max_connections: usize,
}

impl<C: HttpClient> StudIpClientBuilder<C> {
    /// Start building a client over the given backend.
    pub fn new(http: C) -> Self {
        Self {
            http,
            base_url: String::new(),
            username: String::new(),
            password: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Set the API base URL, e.g. `https://studip.example/api.php`.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    /// Use HTTP basic authentication.
    #[must_use]
    pub fn with_basic_auth(mut self, username: &str, password: SecretString) -> Self {
        self.username = username.to_owned();
        self.password = Some(password);
        self
    }

    /// Bound the number of concurrently in-flight requests.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Finish building the client.
    #[must_use]
    pub fn build(self) -> StudIpClient<C> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(password) = &self.password {
            let token = base64_basic(&self.username, password.expose_secret());
            if let Ok(mut value) = HeaderValue::from_str(&format!("Basic {token}")) {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        StudIpClient {
            inner: Arc::new(ClientInner {
                http: self.http,
                base_url: self.base_url,
                headers,
                limiter: Semaphore::new(self.max_connections),
            }),
        }
    }
}

/// RFC 4648 base64 of `user:password` for the `Authorization: Basic` header.
fn base64_basic(username: &str, password: &str) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_token_matches_rfc_example() {
        // RFC 7617's canonical example.
        assert_eq!(
            base64_basic("Aladdin", "open sesame"),
            "QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn url_for_joins_and_appends_query() {
        let inner = ClientInner {
            http: ReqwestClient::default(),
            base_url: "https://studip.example/api.php".to_owned(),
            headers: HeaderMap::new(),
            limiter: Semaphore::new(1),
        };
        assert_eq!(
            inner.url_for("/semesters", &[]),
            "https://studip.example/api.php/semesters"
        );
        assert_eq!(
            inner.url_for("user/u1/courses", &[("offset", "0".to_owned())]),
            "https://studip.example/api.php/user/u1/courses?offset=0"
        );
    }
}
