//! Shared test fixtures: a canned-JSON HTTP backend and a fixture builder
//! for a small remote universe (semesters, courses, folders, files).
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use secrecy::SecretString;
use serde_json::{Value, json};

use studip_api::models::User;
use studip_api::{
    HttpClient, HttpClientError, HttpRequest, HttpResponse, REQUIRED_ENDPOINTS, StudIpClient,
    StudIpClientBuilder,
};

pub const BASE_URL: &str = "https://studip.mock/api.php";

/// A 32-char lowercase-hex id derived from a single seed character.
pub fn hex_id(seed: char) -> String {
    std::iter::repeat_n(seed, 32).collect()
}

#[derive(Default)]
struct MockState {
    /// Plain object routes: path (no leading slash, no query) to JSON body.
    routes: Mutex<HashMap<String, Value>>,
    /// Collection routes, wrapped in a pagination envelope per request.
    collections: Mutex<HashMap<String, Vec<Value>>>,
    /// Download bodies by file id.
    downloads: Mutex<HashMap<String, Vec<u8>>>,
    /// Paths that answer 503.
    failing: Mutex<HashSet<String>>,
    /// Paths whose next request times out (consumed on use).
    timeout_once: Mutex<HashSet<String>>,
    /// Per-path request counters.
    hits: Mutex<HashMap<String, usize>>,
    /// Artificial latency for downloads.
    download_delay: Mutex<Option<Duration>>,
    /// Total download requests, including failed ones.
    download_count: AtomicUsize,
}

/// An [`HttpClient`] backend serving canned responses.
#[derive(Clone)]
pub struct MockHttp {
    state: Arc<MockState>,
}

impl MockHttp {
    fn path_of(url: &str) -> String {
        let after_base = url.split("api.php/").nth(1).unwrap_or(url);
        after_base.split('?').next().unwrap_or(after_base).to_owned()
    }

    fn count(&self, path: &str) {
        *self
            .state
            .hits
            .lock()
            .expect("hit counter lock")
            .entry(path.to_owned())
            .or_default() += 1;
    }

    fn is_failing(&self, path: &str) -> bool {
        self.state.failing.lock().expect("failing lock").contains(path)
    }
}

impl HttpClient for MockHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let path = Self::path_of(&request.url);
        self.count(&path);

        if self
            .state
            .timeout_once
            .lock()
            .expect("timeout lock")
            .remove(&path)
        {
            return Err(HttpClientError::Timeout);
        }

        if self.is_failing(&path) {
            return Ok(HttpResponse {
                status: StatusCode::SERVICE_UNAVAILABLE,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            });
        }

        if let Some(items) = self
            .state
            .collections
            .lock()
            .expect("collections lock")
            .get(&path)
        {
            let body = json!({
                "collection": items,
                "pagination": { "total": items.len(), "offset": 0, "limit": 50 }
            });
            return Ok(HttpResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from(serde_json::to_vec(&body).expect("serialize envelope")),
            });
        }

        let routes = self.state.routes.lock().expect("routes lock");
        match routes.get(&path) {
            Some(body) => Ok(HttpResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from(serde_json::to_vec(body).expect("serialize route")),
            }),
            None => Ok(HttpResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }),
        }
    }

    async fn send_to_file(
        &self,
        request: HttpRequest,
        dest: &Path,
    ) -> Result<u64, HttpClientError> {
        let path = Self::path_of(&request.url);
        self.count(&path);
        self.state.download_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.download_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.is_failing(&path) {
            return Err(HttpClientError::UnexpectedStatus(503));
        }

        let file_id = path
            .strip_prefix("file/")
            .and_then(|rest| rest.strip_suffix("/download"))
            .unwrap_or(&path);
        let body = self
            .state
            .downloads
            .lock()
            .expect("downloads lock")
            .get(file_id)
            .cloned()
            .ok_or(HttpClientError::UnexpectedStatus(404))?;
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }
}

/// Builder for the mock remote universe.
pub struct MockServer {
    http: MockHttp,
    user_id: String,
}

impl MockServer {
    pub fn new() -> Self {
        let server = Self {
            http: MockHttp {
                state: Arc::new(MockState::default()),
            },
            user_id: hex_id('0'),
        };

        let discovery: serde_json::Map<String, Value> = REQUIRED_ENDPOINTS
            .iter()
            .map(|&route| (route.to_owned(), json!({ "get": {} })))
            .collect();
        server.route("discovery", Value::Object(discovery));
        server.route(
            "user",
            json!({ "user_id": server.user_id, "username": "testuser" }),
        );
        server.route(
            "studip/settings",
            json!({
                "SEM_TYPE": { "1": { "name": "Vorlesung", "class": "1" } },
                "SEM_CLASS": { "1": { "name": "Lehre" } }
            }),
        );
        server.collection("semesters", Vec::new());
        server.collection(&format!("user/{}/courses", server.user_id), Vec::new());
        server
    }

    pub fn route(&self, path: &str, body: Value) {
        drop(
            self.http
                .state
                .routes
                .lock()
                .expect("routes lock")
                .insert(path.to_owned(), body),
        );
    }

    fn collection(&self, path: &str, items: Vec<Value>) {
        drop(
            self.http
                .state
                .collections
                .lock()
                .expect("collections lock")
                .insert(path.to_owned(), items),
        );
    }

    fn push_collection(&self, path: &str, item: Value) {
        self.http
            .state
            .collections
            .lock()
            .expect("collections lock")
            .entry(path.to_owned())
            .or_default()
            .push(item);
    }

    /// Register a semester. `begin`/`end` are unix timestamps.
    pub fn semester(&self, id: &str, title: &str, begin: i64, end: i64) {
        self.push_collection(
            "semesters",
            json!({ "id": id, "title": title, "begin": begin, "end": end }),
        );
    }

    /// Register a course of the test user, running in `semester_id`.
    pub fn course(&self, id: &str, title: &str, semester_id: &str) {
        self.push_collection(
            &format!("user/{}/courses", self.user_id),
            json!({
                "course_id": id,
                "title": title,
                "type": "1",
                "start_semester": format!("{BASE_URL}/semesters/{semester_id}"),
                "end_semester": format!("{BASE_URL}/semesters/{semester_id}"),
            }),
        );
    }

    /// Register a folder and, if it is a course's top folder, the
    /// `top_folder` route pointing at it.
    pub fn folder(
        &self,
        id: &str,
        name: &str,
        top_of_course: Option<&str>,
        subfolder_ids: &[&str],
        file_ids: &[&str],
    ) {
        let body = json!({
            "id": id,
            "name": name,
            "subfolders": subfolder_ids,
            "file_refs": file_ids,
        });
        self.route(&format!("folder/{id}"), body.clone());
        if let Some(course_id) = top_of_course {
            self.route(&format!("course/{course_id}/top_folder"), body);
        }
    }

    /// Register a file's metadata and contents.
    pub fn file(&self, id: &str, name: &str, contents: &[u8], chdate: i64) {
        self.route(
            &format!("file/{id}"),
            json!({
                "id": id,
                "name": name,
                "size": contents.len(),
                "mime_type": "application/pdf",
                "chdate": chdate,
                "downloads": 3,
            }),
        );
        drop(
            self.http
                .state
                .downloads
                .lock()
                .expect("downloads lock")
                .insert(id.to_owned(), contents.to_vec()),
        );
    }

    /// Make the next request to `path` time out.
    pub fn timeout_once(&self, path: &str) {
        drop(
            self.http
                .state
                .timeout_once
                .lock()
                .expect("timeout lock")
                .insert(path.to_owned()),
        );
    }

    /// Make `path` answer 503 from now on.
    pub fn fail(&self, path: &str) {
        drop(
            self.http
                .state
                .failing
                .lock()
                .expect("failing lock")
                .insert(path.to_owned()),
        );
    }

    /// Let `path` answer normally again.
    pub fn unfail(&self, path: &str) {
        drop(
            self.http
                .state
                .failing
                .lock()
                .expect("failing lock")
                .remove(path),
        );
    }

    /// Delay every download by `delay`.
    pub fn set_download_delay(&self, delay: Duration) {
        *self.http.state.download_delay.lock().expect("delay lock") = Some(delay);
    }

    /// How often `path` was requested.
    pub fn hits(&self, path: &str) -> usize {
        self.http
            .state
            .hits
            .lock()
            .expect("hit counter lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Total download requests seen.
    pub fn download_count(&self) -> usize {
        self.http.state.download_count.load(Ordering::SeqCst)
    }

    /// A client wired to this mock server.
    pub fn client(&self) -> StudIpClient<MockHttp> {
        StudIpClientBuilder::new(self.http.clone())
            .with_base_url(BASE_URL)
            .with_basic_auth("testuser", SecretString::new("hunter2".to_owned()))
            .build()
    }

    /// The authenticated user, as `open_session` would return it.
    pub fn user(&self) -> User {
        User {
            id: self.user_id.clone(),
            username: "testuser".to_owned(),
        }
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}
