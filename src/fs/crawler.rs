//! Crawler over the Stud.IP REST surface.
//!
//! Wraps a [`StudIpClient`] with process-local result caching: every request
//! key (`()` for the global lists, a course id for folder trees, a file id
//! for file metadata) resolves at most once. Concurrent callers of the same
//! key coalesce onto one in-flight fetch through a broadcast-once signal;
//! failures are terminal for the run and replayed to every later caller.
//!
//! The only local recovery is a single 1s-delayed retry of a timed-out GET.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use scc::HashMap as ConcurrentHashMap;
use studip_api::models::{Course, FileRef, Folder, Semester, User, extract_id};
use studip_api::{ApiError, HttpClient, StudIpClient};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Guard against folder graphs with reference cycles.
const MAX_FOLDER_DEPTH: usize = 64;

/// A fully-assembled folder subtree of one course.
#[derive(Debug)]
pub struct FolderNode {
    /// The folder itself.
    pub folder: Arc<Folder>,
    /// Child folders, fully assembled.
    pub subfolders: Vec<Arc<FolderNode>>,
    /// Files directly in this folder, with metadata resolved.
    pub files: Vec<Arc<FileRef>>,
}

/// State of one memoized request.
enum FetchState<V> {
    /// A fetch is running; waiters clone the receiver and await a change.
    /// The map stays the single source of truth — the channel only signals.
    InFlight(watch::Receiver<()>),
    /// The fetch succeeded.
    Ready(V),
    /// The fetch failed. Terminal: no retry within this run.
    Failed(ApiError),
}

/// A request-keyed memo table with in-flight coalescing.
struct Memo<K: Eq + Hash, V> {
    map: Arc<ConcurrentHashMap<K, FetchState<V>>>,
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            map: Arc::new(ConcurrentHashMap::new()),
        }
    }

    /// Return the memoized value for `key`, starting `fetch` if this is the
    /// first request. The fetch runs as a detached task: a caller that goes
    /// away does not abort it, and every other waiter still gets the result.
    async fn get_or_fetch<Fut>(&self, key: K, fetch: Fut) -> Result<V, ApiError>
    where
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        use scc::hash_map::Entry;

        let mut fetch = Some(fetch);
        loop {
            match self.map.entry_async(key.clone()).await {
                Entry::Occupied(occ) => match occ.get() {
                    FetchState::Ready(v) => return Ok(v.clone()),
                    FetchState::Failed(e) => return Err(e.clone()),
                    FetchState::InFlight(rx) => {
                        let mut rx = rx.clone();
                        drop(occ); // release shard lock before awaiting
                        let _ = rx.changed().await;
                    }
                },
                Entry::Vacant(vac) => {
                    let (tx, rx) = watch::channel(());
                    drop(vac.insert_entry(FetchState::InFlight(rx)));

                    let map = Arc::clone(&self.map);
                    let key = key.clone();
                    let fut = fetch.take().unwrap_or_else(|| {
                        unreachable!("vacant entry is hit at most once per call")
                    });
                    tokio::spawn(async move {
                        let state = match fut.await {
                            Ok(v) => FetchState::Ready(v),
                            Err(e) => {
                                warn!(error = %e, "crawl request failed; caching failure");
                                FetchState::Failed(e)
                            }
                        };
                        map.upsert_async(key, state).await;
                        drop(tx);
                    });
                }
            }
        }
    }
}

/// Retry a timed-out idempotent GET exactly once, after a short delay.
async fn retry_timeout<V, F, Fut>(f: F) -> Result<V, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<V, ApiError>>,
{
    match f().await {
        Err(ApiError::Timeout) => {
            debug!("request timed out, retrying once");
            tokio::time::sleep(RETRY_DELAY).await;
            f().await
        }
        other => other,
    }
}

struct CrawlerInner<C: HttpClient + 'static> {
    client: StudIpClient<C>,
    user: User,
    all_semesters: Memo<(), Arc<Vec<Arc<Semester>>>>,
    courses: Memo<(), Arc<Vec<Arc<Course>>>>,
    folder_trees: Memo<String, Arc<FolderNode>>,
    files: Memo<String, Arc<FileRef>>,
}

/// The crawl façade the resolver consumes.
///
/// Cheap to clone; all clones share the memo tables.
pub struct Crawler<C: HttpClient + 'static> {
    inner: Arc<CrawlerInner<C>>,
}

impl<C: HttpClient + 'static> Clone for Crawler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: HttpClient + 'static> Crawler<C> {
    /// Create a crawler for an authenticated session.
    #[must_use]
    pub fn new(client: StudIpClient<C>, user: User) -> Self {
        Self {
            inner: Arc::new(CrawlerInner {
                client,
                user,
                all_semesters: Memo::new(),
                courses: Memo::new(),
                folder_trees: Memo::new(),
                files: Memo::new(),
            }),
        }
    }

    /// The authenticated user.
    #[must_use]
    pub fn user(&self) -> &User {
        &self.inner.user
    }

    /// All courses of the authenticated user, enriched with resolved type
    /// and class names and semester begin dates. Sorted by id.
    #[instrument(skip(self))]
    pub async fn list_user_courses(&self) -> Result<Arc<Vec<Arc<Course>>>, ApiError> {
        let this = self.clone();
        self.inner
            .courses
            .get_or_fetch((), async move {
                let semesters = this.all_semesters().await?;
                let client = &this.inner.client;
                let settings =
                    retry_timeout(|| async { client.settings().get().await }).await?;
                let mut courses = retry_timeout(|| async {
                    client.courses().list(&this.inner.user.id).collect_all().await
                })
                .await?;

                for course in &mut courses {
                    if let Some(type_info) = course
                        .type_key
                        .as_ref()
                        .and_then(|key| settings.sem_type.get(key))
                    {
                        course.type_name = type_info.name.clone();
                        course.type_short = type_info
                            .short
                            .clone()
                            .unwrap_or_else(|| crate::fs::tokens::abbreviate(&type_info.name));
                        course.class_name = settings
                            .sem_class
                            .get(&type_info.class)
                            .map(|c| c.name.clone())
                            .unwrap_or_default();
                    }
                    course.start_begin = begin_of(&semesters, course.start_semester.as_deref());
                    course.end_begin = begin_of(&semesters, course.end_semester.as_deref());
                }

                courses.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(Arc::new(courses.into_iter().map(Arc::new).collect()))
            })
            .await
    }

    /// The semesters that contain at least one of the user's courses,
    /// sorted by begin date.
    #[instrument(skip(self))]
    pub async fn list_semesters(&self) -> Result<Vec<Arc<Semester>>, ApiError> {
        let all = self.all_semesters().await?;
        let courses = self.list_user_courses().await?;
        let mut populated: Vec<Arc<Semester>> = all
            .iter()
            .filter(|s| courses.iter().any(|c| c.runs_in(s.begin)))
            .cloned()
            .collect();
        populated.sort_by_key(|s| s.begin);
        Ok(populated)
    }

    /// The fully-assembled folder subtree of one course, rooted at the
    /// course's top folder.
    #[instrument(skip(self), fields(course = %course.id))]
    pub async fn list_folder_tree(&self, course: &Course) -> Result<Arc<FolderNode>, ApiError> {
        let this = self.clone();
        let course_id = course.id.clone();
        self.inner
            .folder_trees
            .get_or_fetch(course.id.clone(), async move {
                let top = retry_timeout(|| async {
                    this.inner.client.folders().top_folder(&course_id).await
                })
                .await?;
                build_folder_node(this, Arc::new(top), 0).await
            })
            .await
    }

    /// Metadata of a single file reference.
    #[instrument(skip(self))]
    pub async fn fetch_file_meta(&self, file_id: &str) -> Result<Arc<FileRef>, ApiError> {
        let client = self.inner.client.clone();
        let id = file_id.to_owned();
        self.inner
            .files
            .get_or_fetch(file_id.to_owned(), async move {
                let file = retry_timeout(|| async { client.files().get(&id).await }).await?;
                Ok(Arc::new(file))
            })
            .await
    }

    /// All semesters known to the server, cached.
    async fn all_semesters(&self) -> Result<Arc<Vec<Arc<Semester>>>, ApiError> {
        let client = self.inner.client.clone();
        self.inner
            .all_semesters
            .get_or_fetch((), async move {
                let semesters = retry_timeout(|| async {
                    client.semesters().list().collect_all().await
                })
                .await?;
                Ok(Arc::new(semesters.into_iter().map(Arc::new).collect()))
            })
            .await
    }
}

/// Begin timestamp of the semester referenced by `link` (id or URL).
fn begin_of(semesters: &[Arc<Semester>], link: Option<&str>) -> Option<i64> {
    let id = link.and_then(extract_id)?;
    semesters.iter().find(|s| s.id == id).map(|s| s.begin)
}

/// Recursively assemble a folder node, resolving subfolders and file
/// metadata. File metadata goes through the shared file memo, so a later
/// `fetch_file_meta` for the same id hits cache.
fn build_folder_node<C: HttpClient + 'static>(
    crawler: Crawler<C>,
    folder: Arc<Folder>,
    depth: usize,
) -> std::pin::Pin<Box<dyn Future<Output = Result<Arc<FolderNode>, ApiError>> + Send>> {
    Box::pin(async move {
        if depth > MAX_FOLDER_DEPTH {
            return Err(ApiError::Protocol(format!(
                "folder nesting exceeds {MAX_FOLDER_DEPTH}, possible cycle at {}",
                folder.id
            )));
        }

        let mut files = Vec::with_capacity(folder.file_refs.len());
        for file_ref in &folder.file_refs {
            files.push(crawler.fetch_file_meta(file_ref.id()).await?);
        }
        files.sort_by(|a, b| a.id.cmp(&b.id));

        let mut subfolders = Vec::with_capacity(folder.subfolders.len());
        for sub_ref in &folder.subfolders {
            let sub = retry_timeout(|| async {
                crawler.inner.client.folders().get(sub_ref.id()).await
            })
            .await?;
            let node = build_folder_node(crawler.clone(), Arc::new(sub), depth + 1).await?;
            subfolders.push(node);
        }
        subfolders.sort_by(|a, b| a.folder.id.cmp(&b.folder.id));

        Ok(Arc::new(FolderNode {
            folder,
            subfolders,
            files,
        }))
    })
}
