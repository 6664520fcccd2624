//! End-to-end resolver scenarios against a mocked remote.

mod common;

use std::path::Path;

use common::{MockHttp, MockServer, hex_id};

use studip_fuse::cache::ContentCache;
use studip_fuse::fs::crawler::Crawler;
use studip_fuse::fs::r#trait::{FileAttr, Fs as _, OpenFlags};
use studip_fuse::fs::template::PathTemplate;
use studip_fuse::fs::tree::{ROOT_NODE, Resolver};
use studip_fuse::fs::{StudIpFs, xattr_names};

// 2018-10-01 00:00:00 UTC — begin of WS 2018/19.
const WS18_BEGIN: i64 = 1_538_352_000;
const WS18_END: i64 = 1_554_076_799;

async fn mount(server: &MockServer, format: &str, cache_dir: &Path) -> StudIpFs<MockHttp> {
    let client = server.client();
    let crawler = Crawler::new(client.clone(), server.user());
    let resolver = Resolver::new(
        crawler,
        PathTemplate::compile(format).expect("template compiles"),
        vec!["Hauptordner".to_owned(), "Allgemeiner Dateiordner".to_owned()],
    );
    let cache = ContentCache::open(cache_dir.to_path_buf(), client)
        .await
        .expect("cache opens");
    StudIpFs::new(resolver, cache, (1000, 1000), "https://studip.mock".to_owned())
}

async fn listing(fs: &StudIpFs<MockHttp>, ino: u64) -> Vec<String> {
    fs.readdir(ino)
        .await
        .expect("readdir")
        .into_iter()
        .map(|e| e.name)
        .collect()
}

async fn child_ino(fs: &StudIpFs<MockHttp>, parent: u64, name: &str) -> u64 {
    fs.lookup(parent, name).await.expect("lookup").common().ino
}

/// One semester, one course, one file behind a generic top folder.
fn single_course_universe(server: &MockServer, contents: &[u8]) {
    let (sem, course, top, file) = (hex_id('1'), hex_id('2'), hex_id('3'), hex_id('4'));
    server.semester(&sem, "WS 2018/19", WS18_BEGIN, WS18_END);
    server.course(&course, "Algorithmen und Datenstrukturen", &sem);
    server.folder(&top, "Hauptordner", Some(&course), &[], &[&file]);
    server.file(&file, "A+D141.pdf", contents, 1_540_000_000);
}

#[tokio::test]
async fn walks_semester_course_file_hierarchy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    let contents = vec![0x42_u8; 3_666_701];
    single_course_universe(&server, &contents);

    let fs = mount(&server, "{semester-lexical-short}/{course}/{file-name}", dir.path()).await;

    assert_eq!(listing(&fs, ROOT_NODE).await, [".", "..", "2018WS"]);

    let sem_ino = child_ino(&fs, ROOT_NODE, "2018WS").await;
    assert_eq!(
        listing(&fs, sem_ino).await,
        [".", "..", "Algorithmen und Datenstrukturen"]
    );

    let course_ino = child_ino(&fs, sem_ino, "Algorithmen und Datenstrukturen").await;
    assert_eq!(listing(&fs, course_ino).await, [".", "..", "A+D141.pdf"]);

    let file_attr = fs
        .lookup(course_ino, "A+D141.pdf")
        .await
        .expect("file lookup");
    match file_attr {
        FileAttr::RegularFile { size, .. } => assert_eq!(size, 3_666_701),
        FileAttr::Directory { .. } => panic!("file leaf reported as directory"),
    }
}

#[tokio::test]
async fn first_read_downloads_second_read_hits_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    single_course_universe(&server, b"lecture notes");

    let fs = mount(&server, "{semester-lexical-short}/{course}/{file-name}", dir.path()).await;
    let sem_ino = child_ino(&fs, ROOT_NODE, "2018WS").await;
    let course_ino = child_ino(&fs, sem_ino, "Algorithmen und Datenstrukturen").await;
    let file_ino = child_ino(&fs, course_ino, "A+D141.pdf").await;

    let fh = fs.open(file_ino, OpenFlags::RDONLY).await.expect("open");
    let data = fs.read(file_ino, fh, 0, 64).await.expect("read");
    assert_eq!(&data[..], b"lecture notes");
    fs.release(file_ino, fh).await.expect("release");
    assert_eq!(server.download_count(), 1);

    let fh = fs.open(file_ino, OpenFlags::RDONLY).await.expect("reopen");
    let data = fs.read(file_ino, fh, 8, 64).await.expect("second read");
    assert_eq!(&data[..], b"notes");
    fs.release(file_ino, fh).await.expect("release");
    assert_eq!(server.download_count(), 1, "second read must come from disk");
}

#[tokio::test]
async fn colliding_abbreviations_get_stable_id_suffixes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    let sem = hex_id('1');
    server.semester(&sem, "WS 2018/19", WS18_BEGIN, WS18_END);
    server.course(&hex_id('a'), "Algorithmen und Datenstrukturen", &sem);
    server.course(&hex_id('b'), "Advanced Databases", &sem);

    let fs = mount(&server, "{course-abbrev}/{file-name}", dir.path()).await;

    let names = listing(&fs, ROOT_NODE).await;
    assert_eq!(
        names,
        [".", "..", "AD (aaaaaaaa)", "AD (bbbbbbbb)"],
        "both courses stay discoverable under distinct names"
    );
    // And both resolve.
    let _ = child_ino(&fs, ROOT_NODE, "AD (aaaaaaaa)").await;
    let _ = child_ino(&fs, ROOT_NODE, "AD (bbbbbbbb)").await;
}

#[tokio::test]
async fn generic_top_folder_is_transparent_for_short_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    let (sem, course, top, sub, f_direct, f_nested) = (
        hex_id('1'),
        hex_id('2'),
        hex_id('3'),
        hex_id('5'),
        hex_id('6'),
        hex_id('7'),
    );
    server.semester(&sem, "WS 2018/19", WS18_BEGIN, WS18_END);
    server.course(&course, "Analysis", &sem);
    server.folder(&top, "Hauptordner", Some(&course), &[&sub], &[&f_direct]);
    server.folder(&sub, "Blatt 1", None, &[], &[&f_nested]);
    server.file(&f_direct, "skript.pdf", b"skript", 1_540_000_000);
    server.file(&f_nested, "blatt01.pdf", b"blatt", 1_540_000_000);

    let fs = mount(
        &server,
        "{semester-lexical-short}/{course}/{short-path}/{file-name}",
        dir.path(),
    )
    .await;

    let sem_ino = child_ino(&fs, ROOT_NODE, "2018WS").await;
    let course_ino = child_ino(&fs, sem_ino, "Analysis").await;

    // Hauptordner itself does not appear; its children do.
    assert_eq!(
        listing(&fs, course_ino).await,
        [".", "..", "Blatt 1", "skript.pdf"]
    );

    let sub_ino = child_ino(&fs, course_ino, "Blatt 1").await;
    assert_eq!(listing(&fs, sub_ino).await, [".", "..", "blatt01.pdf"]);
}

#[tokio::test]
async fn folder_tree_failure_is_terminal_and_scoped_to_the_course() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    let (sem, good, bad, top, file) =
        (hex_id('1'), hex_id('2'), hex_id('b'), hex_id('3'), hex_id('4'));
    server.semester(&sem, "WS 2018/19", WS18_BEGIN, WS18_END);
    server.course(&good, "Analysis", &sem);
    server.course(&bad, "Zahlentheorie", &sem);
    server.folder(&top, "Hauptordner", Some(&good), &[], &[&file]);
    server.file(&file, "skript.pdf", b"ok", 1_540_000_000);
    server.fail(&format!("course/{bad}/top_folder"));

    let fs = mount(
        &server,
        "{semester-lexical-short}/{course}/{short-path}/{file-name}",
        dir.path(),
    )
    .await;

    let sem_ino = child_ino(&fs, ROOT_NODE, "2018WS").await;
    let bad_ino = child_ino(&fs, sem_ino, "Zahlentheorie").await;

    let err = fs.readdir(bad_ino).await.expect_err("listing must fail");
    assert_eq!(i32::from(err), libc::EIO);

    // The failure is recorded on the node and replayed without retry.
    let err = fs.readdir(bad_ino).await.expect_err("still failing");
    assert_eq!(i32::from(err), libc::EIO);
    assert_eq!(server.hits(&format!("course/{bad}/top_folder")), 1);

    let status = fs
        .getxattr(bad_ino, xattr_names::CONTENTS_STATUS)
        .await
        .expect("status xattr");
    assert_eq!(status, b"failed");
    let exception = fs
        .getxattr(bad_ino, xattr_names::CONTENTS_EXCEPTION)
        .await
        .expect("exception xattr");
    assert!(!exception.is_empty());

    // The sibling course stays reachable.
    let good_ino = child_ino(&fs, sem_ino, "Analysis").await;
    assert_eq!(listing(&fs, good_ino).await, [".", "..", "skript.pdf"]);
}

#[tokio::test]
async fn readdir_is_stable_and_expansion_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    single_course_universe(&server, b"x");

    let fs = mount(&server, "{semester-lexical-short}/{course}/{file-name}", dir.path()).await;

    let first = listing(&fs, ROOT_NODE).await;
    let second = listing(&fs, ROOT_NODE).await;
    assert_eq!(first, second);

    let children_a = fs.resolver().expand(ROOT_NODE).await.expect("expand");
    let children_b = fs.resolver().expand(ROOT_NODE).await.expect("expand again");
    assert!(
        std::sync::Arc::ptr_eq(&children_a, &children_b),
        "re-expansion must return the same child set by identity"
    );
    assert_eq!(server.hits("semesters"), 1, "remote enumerated once");
}

#[tokio::test]
async fn write_flavoured_opens_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    single_course_universe(&server, b"x");

    let fs = mount(&server, "{semester-lexical-short}/{course}/{file-name}", dir.path()).await;
    let sem_ino = child_ino(&fs, ROOT_NODE, "2018WS").await;
    let course_ino = child_ino(&fs, sem_ino, "Algorithmen und Datenstrukturen").await;
    let file_ino = child_ino(&fs, course_ino, "A+D141.pdf").await;

    for flags in [
        OpenFlags::WRONLY,
        OpenFlags::RDWR,
        OpenFlags::RDONLY | OpenFlags::APPEND,
        OpenFlags::RDONLY | OpenFlags::TRUNC,
    ] {
        let err = fs.open(file_ino, flags).await.expect_err("write open");
        assert_eq!(i32::from(err), libc::EROFS, "flags {flags:?}");
    }
}

#[tokio::test]
async fn xattrs_expose_tokens_entity_and_url() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    single_course_universe(&server, b"x");

    let fs = mount(&server, "{semester-lexical-short}/{course}/{file-name}", dir.path()).await;
    let sem_ino = child_ino(&fs, ROOT_NODE, "2018WS").await;
    let course_ino = child_ino(&fs, sem_ino, "Algorithmen und Datenstrukturen").await;

    let names = fs.listxattr(course_ino).await.expect("listxattr");
    let expected: Vec<String> = xattr_names::ALL.iter().map(|&n| n.to_owned()).collect();
    assert_eq!(names, expected);

    let raw = fs
        .getxattr(course_ino, xattr_names::KNOWN_TOKENS)
        .await
        .expect("known-tokens");
    let tokens: serde_json::Value = serde_json::from_slice(&raw).expect("valid json");
    assert_eq!(tokens["semester-lexical-short"], "2018WS");
    assert_eq!(tokens["course"], "Algorithmen und Datenstrukturen");
    assert_eq!(tokens["course-type"], "Vorlesung");
    assert_eq!(tokens["course-class"], "Lehre");
    assert_eq!(tokens["file-name"], "", "file level is not bound here");

    let url = fs
        .getxattr(course_ino, xattr_names::URL)
        .await
        .expect("url");
    let url = String::from_utf8(url).expect("utf8");
    assert!(url.starts_with("https://studip.mock/dispatch.php/course/"), "{url}");

    let entity = fs
        .getxattr(course_ino, xattr_names::JSON)
        .await
        .expect("entity json");
    let entity: serde_json::Value = serde_json::from_slice(&entity).expect("valid json");
    assert_eq!(entity["title"], "Algorithmen und Datenstrukturen");

    let err = fs
        .getxattr(course_ino, "user.unrelated")
        .await
        .expect_err("unknown attribute");
    assert_eq!(i32::from(err), libc::ENODATA);
}

#[tokio::test]
async fn session_open_verifies_user_and_discovery() {
    let server = MockServer::new();
    let client = server.client();
    let user = client.open_session("testuser").await.expect("session");
    assert_eq!(user.username, "testuser");

    // Wrong user: auth error.
    let err = client.open_session("somebodyelse").await.expect_err("must fail");
    assert_eq!(err, studip_api::ApiError::Auth);

    // Missing endpoint: fail fast.
    server.route("discovery", serde_json::json!({ "/user": { "get": {} } }));
    let err = client.open_session("testuser").await.expect_err("must fail");
    assert!(matches!(err, studip_api::ApiError::EndpointMissing(_)));
}

#[tokio::test]
async fn timed_out_get_is_retried_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    single_course_universe(&server, b"x");
    server.timeout_once("semesters");

    let fs = mount(&server, "{semester-lexical-short}/{course}/{file-name}", dir.path()).await;
    assert_eq!(listing(&fs, ROOT_NODE).await, [".", "..", "2018WS"]);
    assert_eq!(server.hits("semesters"), 2, "one timeout, one retry");
}

#[tokio::test]
async fn paths_resolve_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::new();
    single_course_universe(&server, b"x");

    let fs = mount(&server, "{semester-lexical-short}/{course}/{file-name}", dir.path()).await;
    let resolver = fs.resolver();

    let found = resolver
        .resolve_path("/2018WS/Algorithmen und Datenstrukturen/A+D141.pdf")
        .await
        .expect("resolution");
    assert!(found.is_some());

    let missing = resolver
        .resolve_path("/2018WS/No Such Course/whatever.pdf")
        .await
        .expect("resolution");
    assert!(missing.is_none());
}
