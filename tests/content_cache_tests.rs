//! Content cache behavior under concurrency and cancellation, through the
//! real client plumbing.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{MockHttp, MockServer, hex_id};

use studip_fuse::cache::ContentCache;
use studip_fuse::fs::crawler::Crawler;
use studip_fuse::fs::r#trait::{Fs as _, OpenFlags};
use studip_fuse::fs::template::PathTemplate;
use studip_fuse::fs::tree::{ROOT_NODE, Resolver};
use studip_fuse::fs::StudIpFs;

const WS18_BEGIN: i64 = 1_538_352_000;

async fn mount(server: &MockServer, cache_dir: &Path) -> Arc<StudIpFs<MockHttp>> {
    let client = server.client();
    let crawler = Crawler::new(client.clone(), server.user());
    let resolver = Resolver::new(
        crawler,
        PathTemplate::compile("{course}/{file-name}").expect("template compiles"),
        vec!["Hauptordner".to_owned()],
    );
    let cache = ContentCache::open(cache_dir.to_path_buf(), client)
        .await
        .expect("cache opens");
    Arc::new(StudIpFs::new(
        resolver,
        cache,
        (1000, 1000),
        "https://studip.mock".to_owned(),
    ))
}

fn universe(server: &MockServer, contents: &[u8]) {
    let (sem, course, top, file) = (hex_id('1'), hex_id('2'), hex_id('3'), hex_id('4'));
    server.semester(&sem, "WS 2018/19", WS18_BEGIN, WS18_BEGIN + 180 * 86_400);
    server.course(&course, "Analysis", &sem);
    server.folder(&top, "Hauptordner", Some(&course), &[], &[&file]);
    server.file(&file, "skript.pdf", contents, 1_540_000_000);
}

async fn file_ino(fs: &StudIpFs<MockHttp>) -> u64 {
    let course_ino = fs
        .lookup(ROOT_NODE, "Analysis")
        .await
        .expect("course")
        .common()
        .ino;
    fs.lookup(course_ino, "skript.pdf")
        .await
        .expect("file")
        .common()
        .ino
}

#[tokio::test]
async fn concurrent_readers_share_one_download() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    universe(&server, b"contents of the script");
    server.set_download_delay(Duration::from_millis(20));

    let fs = mount(&server, dir.path()).await;
    let ino = file_ino(&fs).await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let fs = Arc::clone(&fs);
        tasks.push(tokio::spawn(async move {
            let fh = fs.open(ino, OpenFlags::RDONLY).await.expect("open");
            let data = fs.read(ino, fh, 0, 1024).await.expect("read");
            fs.release(ino, fh).await.expect("release");
            data
        }));
    }
    for task in tasks {
        let data = task.await.expect("task");
        assert_eq!(&data[..], b"contents of the script");
    }

    assert_eq!(server.download_count(), 1, "all readers share one fetch");
}

#[tokio::test]
async fn cancelled_reader_does_not_abort_the_shared_download() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    universe(&server, b"slow body");
    server.set_download_delay(Duration::from_millis(150));

    let fs = mount(&server, dir.path()).await;
    let ino = file_ino(&fs).await;

    // First reader starts the download, then goes away mid-flight.
    let task = {
        let fs = Arc::clone(&fs);
        tokio::spawn(async move {
            let fh = fs.open(ino, OpenFlags::RDONLY).await.expect("open");
            fs.read(ino, fh, 0, 1024).await.expect("read")
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    task.abort();
    assert!(task.await.is_err(), "reader was cancelled");

    // A later reader observes the completed entry; the endpoint was hit
    // exactly once.
    let fh = fs.open(ino, OpenFlags::RDONLY).await.expect("open after abort");
    let data = fs.read(ino, fh, 0, 1024).await.expect("read after abort");
    assert_eq!(&data[..], b"slow body");
    assert_eq!(server.download_count(), 1);
}

#[tokio::test]
async fn cache_survives_a_remount() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    universe(&server, b"persistent");

    {
        let fs = mount(&server, dir.path()).await;
        let ino = file_ino(&fs).await;
        let fh = fs.open(ino, OpenFlags::RDONLY).await.expect("open");
        let _ = fs.read(ino, fh, 0, 16).await.expect("read");
        fs.release(ino, fh).await.expect("release");
    }
    assert_eq!(server.download_count(), 1);

    // A fresh mount over the same cache directory finds the entry on disk.
    let fs = mount(&server, dir.path()).await;
    let ino = file_ino(&fs).await;
    let fh = fs.open(ino, OpenFlags::RDONLY).await.expect("open");
    let data = fs.read(ino, fh, 0, 16).await.expect("read");
    assert_eq!(&data[..], b"persistent");
    assert_eq!(server.download_count(), 1, "no re-download after restart");
}

#[tokio::test]
async fn failed_download_surfaces_eio_and_allows_retry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    universe(&server, b"eventually fine");
    let file = hex_id('4');
    server.fail(&format!("file/{file}/download"));

    let fs = mount(&server, dir.path()).await;
    let ino = file_ino(&fs).await;

    let err = fs.open(ino, OpenFlags::RDONLY).await.expect_err("must fail");
    assert_eq!(i32::from(err), libc::EIO);

    // The slot is freed: a later open retries and the server has recovered.
    server.unfail(&format!("file/{file}/download"));
    let fh = fs.open(ino, OpenFlags::RDONLY).await.expect("retry succeeds");
    let data = fs.read(ino, fh, 0, 64).await.expect("read");
    assert_eq!(&data[..], b"eventually fine");
}
