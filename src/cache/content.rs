//! Content-addressed on-disk store for downloaded file bodies.
//!
//! Cache entries are keyed by `(file id, content version token)` and live at
//!
//! ```text
//! <root>/files/<aa>/<bb>/<file-id>_<token>/<file-name>
//! <root>/files/<aa>/<bb>/<file-id>_<token>.meta.json
//! ```
//!
//! where `<aa>/<bb>` are the first two hex-byte shards of the file id. The
//! meta file doubles as the completion sentinel: an entry without it is
//! treated as absent. Bodies are streamed to a `.part` sibling and renamed
//! into place, so a crash never leaves a half-written final file; stale
//! `.part` files are collected on startup.
//!
//! Concurrent readers of the same fingerprint coalesce onto one download.
//! The download runs detached, so a cancelled reader never aborts it for the
//! others. A failed download releases its waiters with the error and frees
//! the slot, so a later open may retry.

use std::future::Future;
use std::os::unix::fs::FileExt as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use scc::HashMap as ConcurrentHashMap;
use serde::{Deserialize, Serialize};
use studip_api::models::FileRef;
use studip_api::{ApiError, HttpClient, StudIpClient};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument, trace, warn};

/// The tuple keying a cache entry.
pub type Fingerprint = (String, String);

const MARKER_FILE: &str = ".studip-fuse-cache";

/// Failures of the content cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Local disk I/O failed.
    #[error("cache I/O failed: {0}")]
    Io(Arc<std::io::Error>),

    /// Fetching the body from the server failed.
    #[error("download failed: {0}")]
    Download(#[from] ApiError),

    /// The body did not match the size the server reported in metadata.
    #[error("downloaded {actual} bytes, metadata reported {expected}")]
    SizeMismatch {
        /// Size from file metadata.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// The configured cache directory cannot be used.
    #[error("cache root is not usable: {0}")]
    InvalidRoot(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Source of file bodies, keyed by file id.
pub trait FetchContents: Send + Sync + 'static {
    /// Stream the body of `file_id` to `dest`, returning the byte count.
    fn fetch_to(
        &self,
        file_id: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<u64, ApiError>> + Send;
}

impl<C: HttpClient + 'static> FetchContents for StudIpClient<C> {
    async fn fetch_to(&self, file_id: &str, dest: &Path) -> Result<u64, ApiError> {
        self.download_to(file_id, dest).await
    }
}

/// A read-only handle to fully-downloaded contents. Shared across all open
/// file handles of the same fingerprint; read positions stay per caller.
#[derive(Debug)]
pub struct CachedFile {
    file: std::fs::File,
    size: u64,
    path: PathBuf,
}

impl CachedFile {
    /// Positional read with POSIX EOF semantics.
    pub fn read(&self, offset: u64, size: u32) -> std::io::Result<Bytes> {
        if offset >= self.size {
            return Ok(Bytes::new());
        }
        let len = u64::from(size).min(self.size - offset);
        let mut buf = vec![0_u8; usize::try_from(len).unwrap_or(usize::MAX)];
        let mut read = 0;
        while read < buf.len() {
            let n = self.file.read_at(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }

    /// Size of the cached contents.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Where the contents live on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The completion sentinel written next to every finished entry.
#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    size: u64,
    mime_type: Option<String>,
    terms: Option<String>,
    complete: bool,
}

enum EntryState {
    /// Download in flight; waiters clone the receiver and await a change.
    Downloading(watch::Receiver<()>),
    /// Contents on disk and readable.
    Ready(Arc<CachedFile>),
    /// The download failed. Unlike node expansion this is not terminal: the
    /// next `open` replaces the entry and retries.
    Failed(CacheError),
}

struct CacheInner<F: FetchContents> {
    root: PathBuf,
    fetcher: F,
    inflight: ConcurrentHashMap<Fingerprint, EntryState>,
}

/// The content cache. Cheap to clone; clones share the inflight table.
pub struct ContentCache<F: FetchContents> {
    inner: Arc<CacheInner<F>>,
}

impl<F: FetchContents> Clone for ContentCache<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: FetchContents> ContentCache<F> {
    /// Open (or create) a cache rooted at `root`.
    ///
    /// The directory must be empty, nonexistent, or previously used by this
    /// cache (detected via a marker file). Stale `.part` files from a
    /// crashed run are removed.
    pub async fn open(root: impl Into<PathBuf>, fetcher: F) -> Result<Self, CacheError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let marker = root.join(MARKER_FILE);
        if !tokio::fs::try_exists(&marker).await? {
            let mut entries = tokio::fs::read_dir(&root).await?;
            if entries.next_entry().await?.is_some() {
                return Err(CacheError::InvalidRoot(format!(
                    "'{}' is not empty and does not look like a studip-fuse cache",
                    root.display()
                )));
            }
            tokio::fs::write(&marker, b"").await?;
        }

        let files_dir = root.join("files");
        tokio::fs::create_dir_all(&files_dir).await?;
        let removed = tokio::task::spawn_blocking(move || remove_partials(&files_dir))
            .await
            .unwrap_or(Ok(0))?;
        if removed > 0 {
            debug!(removed, "collected stale .part files from a previous run");
        }

        Ok(Self {
            inner: Arc::new(CacheInner {
                root,
                fetcher,
                inflight: ConcurrentHashMap::new(),
            }),
        })
    }

    /// Produce a readable handle for `file`, downloading its contents at
    /// most once per fingerprint.
    #[instrument(skip(self, file), fields(file = %file.id))]
    pub async fn open_file(&self, file: &FileRef) -> Result<Arc<CachedFile>, CacheError> {
        use scc::hash_map::Entry;

        let fingerprint: Fingerprint = (file.id.clone(), url_safe(&file.version_token()));
        let mut was_waiting = false;

        loop {
            match self.inner.inflight.entry_async(fingerprint.clone()).await {
                Entry::Occupied(mut occ) => match occ.get() {
                    EntryState::Ready(cached) => return Ok(Arc::clone(cached)),
                    EntryState::Failed(e) => {
                        if was_waiting {
                            // We watched this download fail; report it. The
                            // next open retries.
                            return Err(e.clone());
                        }
                        let (tx, rx) = watch::channel(());
                        *occ.get_mut() = EntryState::Downloading(rx);
                        drop(occ);
                        self.spawn_download(fingerprint.clone(), file.clone(), tx);
                    }
                    EntryState::Downloading(rx) => {
                        let mut rx = rx.clone();
                        drop(occ); // release shard lock before awaiting
                        let _ = rx.changed().await;
                        was_waiting = true;
                    }
                },
                Entry::Vacant(vac) => {
                    let (tx, rx) = watch::channel(());
                    drop(vac.insert_entry(EntryState::Downloading(rx)));
                    self.spawn_download(fingerprint.clone(), file.clone(), tx);
                }
            }
        }
    }

    /// Run one download to completion as a detached task and publish the
    /// outcome to every waiter.
    fn spawn_download(&self, fingerprint: Fingerprint, file: FileRef, tx: watch::Sender<()>) {
        let cache = self.clone();
        tokio::spawn(async move {
            let state = match cache.materialize(&fingerprint, &file).await {
                Ok(cached) => EntryState::Ready(cached),
                Err(e) => {
                    warn!(file = %file.id, error = %e, "download failed");
                    EntryState::Failed(e)
                }
            };
            cache.inner.inflight.upsert_async(fingerprint, state).await;
            drop(tx);
        });
    }

    /// Ensure the entry exists on disk, downloading if necessary, and open
    /// a read-only handle to it.
    async fn materialize(
        &self,
        fingerprint: &Fingerprint,
        file: &FileRef,
    ) -> Result<Arc<CachedFile>, CacheError> {
        let (entry_dir, meta_path) = self.entry_paths(fingerprint);
        let final_path = entry_dir.join(safe_file_name(&file.name));

        if let Some(cached) = self.open_existing(&meta_path, &final_path).await? {
            trace!(path = %final_path.display(), "serving from disk, sentinel valid");
            return Ok(cached);
        }

        tokio::fs::create_dir_all(&entry_dir).await?;
        let part_path = entry_dir.join(format!("{}.part", safe_file_name(&file.name)));

        let written = match self.inner.fetcher.fetch_to(&file.id, &part_path).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e.into());
            }
        };
        if file.size > 0 && written != file.size {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(CacheError::SizeMismatch {
                expected: file.size,
                actual: written,
            });
        }

        tokio::fs::rename(&part_path, &final_path).await?;
        let meta = CacheMeta {
            size: written,
            mime_type: file.mime_type.clone(),
            terms: file.terms.clone(),
            complete: true,
        };
        tokio::fs::write(&meta_path, serde_json::to_vec(&meta).map_err(std::io::Error::other)?)
            .await?;

        debug!(file = %file.id, bytes = written, "download complete");
        open_read_only(&final_path)
    }

    /// Open an entry already on disk, if its sentinel checks out.
    async fn open_existing(
        &self,
        meta_path: &Path,
        final_path: &Path,
    ) -> Result<Option<Arc<CachedFile>>, CacheError> {
        let Ok(raw) = tokio::fs::read(meta_path).await else {
            return Ok(None);
        };
        let Ok(meta) = serde_json::from_slice::<CacheMeta>(&raw) else {
            return Ok(None);
        };
        if !meta.complete || !tokio::fs::try_exists(final_path).await? {
            return Ok(None);
        }
        Ok(Some(open_read_only(final_path)?))
    }

    /// Entry directory and meta sentinel path of a fingerprint.
    fn entry_paths(&self, (file_id, token): &Fingerprint) -> (PathBuf, PathBuf) {
        let shard_a = file_id.get(0..2).unwrap_or("00");
        let shard_b = file_id.get(2..4).unwrap_or("00");
        let shard = self.inner.root.join("files").join(shard_a).join(shard_b);
        let entry_name = format!("{file_id}_{token}");
        let meta = shard.join(format!("{entry_name}.meta.json"));
        (shard.join(entry_name), meta)
    }
}

fn open_read_only(path: &Path) -> Result<Arc<CachedFile>, CacheError> {
    let file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    Ok(Arc::new(CachedFile {
        file,
        size,
        path: path.to_path_buf(),
    }))
}

/// A server-supplied file name confined to a single path component.
fn safe_file_name(name: &str) -> String {
    let safe = name.replace(['/', '\0'], "-");
    match safe.trim() {
        "" | "." | ".." => "unnamed".to_owned(),
        trimmed => trimmed.to_owned(),
    }
}

/// A version token made safe for use in a directory name.
fn url_safe(token: &str) -> String {
    token
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Recursively delete `*.part` files under `dir`, returning how many.
fn remove_partials(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            removed += remove_partials(&path)?;
        } else if path.extension().is_some_and(|ext| ext == "part") {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetcher that writes fixed bytes and counts invocations.
    struct FixedFetcher {
        body: Vec<u8>,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FetchContents for Arc<FixedFetcher> {
        async fn fetch_to(&self, _file_id: &str, dest: &Path) -> Result<u64, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(ApiError::HttpStatus(500));
            }
            tokio::fs::write(dest, &self.body).await.map_err(|e| {
                ApiError::Protocol(e.to_string())
            })?;
            Ok(self.body.len() as u64)
        }
    }

    fn test_file(id: &str, size: u64) -> FileRef {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "lecture.pdf",
            "size": size,
            "chdate": 1_700_000_000_i64,
        }))
        .expect("valid file json")
    }

    fn fetcher(body: &[u8], fail: bool) -> (Arc<FixedFetcher>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(FixedFetcher {
                body: body.to_vec(),
                calls: Arc::clone(&calls),
                fail,
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn downloads_once_and_serves_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (f, calls) = fetcher(b"hello world", false);
        let cache = ContentCache::open(dir.path().join("cache"), f)
            .await
            .expect("open cache");

        let file = test_file("ab12cd34ab12cd34ab12cd34ab12cd34", 11);
        let first = cache.open_file(&file).await.expect("first open");
        assert_eq!(&first.read(0, 64).expect("read")[..], b"hello world");

        let second = cache.open_file(&file).await.expect("second open");
        assert_eq!(&second.read(6, 5).expect("read")[..], b"world");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "one fetch per fingerprint");
    }

    #[tokio::test]
    async fn concurrent_opens_coalesce_to_one_fetch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (f, calls) = fetcher(b"data", false);
        let cache = ContentCache::open(dir.path().join("cache"), f)
            .await
            .expect("open cache");
        let file = test_file("ab12cd34ab12cd34ab12cd34ab12cd34", 4);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let file = file.clone();
            handles.push(tokio::spawn(async move { cache.open_file(&file).await }));
        }
        for handle in handles {
            handle.await.expect("task").expect("open");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_download_frees_the_slot_for_retry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (f, calls) = fetcher(b"", true);
        let cache = ContentCache::open(dir.path().join("cache"), f)
            .await
            .expect("open cache");
        let file = test_file("ab12cd34ab12cd34ab12cd34ab12cd34", 4);

        assert!(cache.open_file(&file).await.is_err());
        assert!(cache.open_file(&file).await.is_err(), "retry also fails");
        assert_eq!(calls.load(Ordering::SeqCst), 2, "each open retried the fetch");

        // No half-written state may survive a failure.
        assert_eq!(count_partials(dir.path()), 0);
    }

    #[tokio::test]
    async fn size_mismatch_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (f, _calls) = fetcher(b"short", false);
        let cache = ContentCache::open(dir.path().join("cache"), f)
            .await
            .expect("open cache");
        let file = test_file("ab12cd34ab12cd34ab12cd34ab12cd34", 9999);

        match cache.open_file(&file).await {
            Err(CacheError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, 9999);
                assert_eq!(actual, 5);
            }
            other => panic!("expected SizeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn file_names_are_confined_to_one_component() {
        assert_eq!(safe_file_name("lecture.pdf"), "lecture.pdf");
        assert_eq!(safe_file_name("a/b.pdf"), "a-b.pdf");
        assert_eq!(safe_file_name("../escape"), "..-escape");
        assert_eq!(safe_file_name(""), "unnamed");
        assert_eq!(safe_file_name(".."), "unnamed");
    }

    #[tokio::test]
    async fn stale_partials_are_collected_on_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("cache");
        let shard = root.join("files").join("ab").join("12");
        std::fs::create_dir_all(&shard).expect("mkdir");
        std::fs::write(root.join(MARKER_FILE), b"").expect("marker");
        std::fs::write(shard.join("leftover.pdf.part"), b"junk").expect("part");

        let (f, _calls) = fetcher(b"", false);
        let _cache = ContentCache::open(&root, f).await.expect("open cache");
        assert_eq!(count_partials(dir.path()), 0);
    }

    #[tokio::test]
    async fn refuses_foreign_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("unrelated.txt"), b"x").expect("write");
        let (f, _calls) = fetcher(b"", false);
        match ContentCache::open(dir.path(), f).await {
            Err(CacheError::InvalidRoot(_)) => {}
            other => panic!("expected InvalidRoot, got {:?}", other.map(|_| ())),
        }
    }

    fn count_partials(dir: &Path) -> usize {
        let mut count = 0;
        for entry in std::fs::read_dir(dir).expect("read_dir") {
            let entry = entry.expect("entry");
            if entry.file_type().expect("ft").is_dir() {
                count += count_partials(&entry.path());
            } else if entry.path().extension().is_some_and(|e| e == "part") {
                count += 1;
            }
        }
        count
    }
}
