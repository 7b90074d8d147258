//! Integration tests for the store contract operations
//!
//! Exercises listing, directory creation, stat, rmdir, move, purge,
//! cleanup, quota, share links, and server-side copy against the mock
//! provider.

use openpan_core::domain::errors::StoreError;
use openpan_core::domain::newtypes::{FileId, Md5Hash, RemotePath};
use openpan_core::ports::remote_store::IRemoteStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

fn rpath(s: &str) -> RemotePath {
    RemotePath::new(s.to_string()).unwrap()
}

/// Mount a mkdir endpoint answering exactly once with the given id
async fn mount_mkdir_once(server: &MockServer, dir_id: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/file/mkdir"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::ok_envelope(serde_json::json!({ "dirID": dir_id }))),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
}

/// The body of the nth request to a method/path pair
async fn request_body(
    server: &MockServer,
    http_method: &str,
    url_path: &str,
    index: usize,
) -> serde_json::Value {
    let requests = server.received_requests().await.unwrap();
    let hit = requests
        .iter()
        .filter(|r| {
            r.method.to_string().eq_ignore_ascii_case(http_method) && r.url.path() == url_path
        })
        .nth(index)
        .expect("request not found");
    serde_json::from_slice(&hit.body).expect("request body is not JSON")
}

// ============================================================================
// mkdir
// ============================================================================

#[tokio::test]
async fn test_mkdir_creates_missing_components_and_caches_them() {
    let server = MockServer::start().await;
    common::mount_listing(&server, "0", serde_json::json!([])).await;
    common::mount_listing(&server, "101", serde_json::json!([])).await;
    common::mount_listing(&server, "102", serde_json::json!([])).await;
    mount_mkdir_once(&server, 101).await;
    mount_mkdir_once(&server, 102).await;
    mount_mkdir_once(&server, 103).await;

    let (store, _) = common::mock_store(&server);
    store.mkdir(&rpath("/a/b/c")).await.unwrap();

    // Three create-dir calls, three cache installs
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/file/mkdir").await,
        3
    );
    let cache = store.resolver().cache();
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get(&rpath("/a")).unwrap().as_str(), "101");
    assert_eq!(cache.get(&rpath("/a/b")).unwrap().as_str(), "102");
    assert_eq!(cache.get(&rpath("/a/b/c")).unwrap().as_str(), "103");
}

#[tokio::test]
async fn test_mkdir_is_idempotent_via_cache() {
    let server = MockServer::start().await;
    common::mount_listing(&server, "0", serde_json::json!([])).await;
    mount_mkdir_once(&server, 101).await;

    let (store, _) = common::mock_store(&server);
    store.mkdir(&rpath("/a")).await.unwrap();
    store.mkdir(&rpath("/a")).await.unwrap();

    // The second call is satisfied from the cache
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/file/mkdir").await,
        1
    );
}

// ============================================================================
// list / stat
// ============================================================================

#[tokio::test]
async fn test_list_decodes_names_and_filters_trashed() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 21, "filename": "what％3F.txt", "type": 0, "size": 9,
             "etag": "d41d8cd98f00b204e9800998ecf8427e", "parentFileId": 0},
            {"fileId": 11, "filename": "docs", "type": 1, "parentFileId": 0},
            {"fileId": 31, "filename": "gone.txt", "type": 0, "parentFileId": 0, "trashed": 1}
        ]),
    )
    .await;

    let (store, _) = common::mock_store(&server);
    let entries = store.list(&RemotePath::root()).await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name(), "what?.txt");
    assert!(!entries[0].is_dir());
    assert_eq!(entries[1].name(), "docs");
    assert!(entries[1].is_dir());

    // The child directory was installed in the cache
    assert_eq!(
        store.resolver().cache().get(&rpath("/docs")).unwrap().as_str(),
        "11"
    );
}

#[tokio::test]
async fn test_list_missing_dir_fails() {
    let server = MockServer::start().await;
    common::mount_listing(&server, "0", serde_json::json!([])).await;

    let (store, _) = common::mock_store(&server);
    let err = store.list(&rpath("/absent")).await.unwrap_err();
    assert!(matches!(err, StoreError::DirNotFound(_)));
}

#[tokio::test]
async fn test_stat_returns_populated_object() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 21, "filename": "a.bin", "type": 0, "size": 1024,
             "etag": "900150983cd24fb0d6963f7d28e17f72", "parentFileId": 0,
             "updateAt": "2026-03-01 10:30:00"}
        ]),
    )
    .await;

    let (store, _) = common::mock_store(&server);
    let object = store.stat(&rpath("/a.bin")).await.unwrap();

    assert_eq!(object.id.as_str(), "21");
    assert_eq!(object.size, 1024);
    assert_eq!(
        object.md5.unwrap().as_str(),
        "900150983cd24fb0d6963f7d28e17f72"
    );
    assert!(object.fetched);
    assert!(object.mod_time.is_some());
}

#[tokio::test]
async fn test_stat_not_found_and_is_dir() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 11, "filename": "docs", "type": 1, "parentFileId": 0}
        ]),
    )
    .await;

    let (store, _) = common::mock_store(&server);

    let err = store.stat(&rpath("/missing.txt")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let err = store.stat(&rpath("/docs")).await.unwrap_err();
    assert!(matches!(err, StoreError::IsDirectory(_)));
}

// ============================================================================
// rmdir
// ============================================================================

#[tokio::test]
async fn test_rmdir_refuses_non_empty_directory() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 11, "filename": "full", "type": 1, "parentFileId": 0}
        ]),
    )
    .await;
    common::mount_listing(
        &server,
        "11",
        serde_json::json!([
            {"fileId": 21, "filename": "child.txt", "type": 0, "parentFileId": 11}
        ]),
    )
    .await;
    common::mount_trash(&server).await;

    let (store, _) = common::mock_store(&server);
    let err = store.rmdir(&rpath("/full")).await.unwrap_err();

    assert!(matches!(err, StoreError::DirNotEmpty(_)));
    // Nothing was trashed
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/file/trash").await,
        0
    );
}

#[tokio::test]
async fn test_rmdir_ignores_trashed_children_and_trashes_dir() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 11, "filename": "old", "type": 1, "parentFileId": 0}
        ]),
    )
    .await;
    common::mount_listing(
        &server,
        "11",
        serde_json::json!([
            {"fileId": 21, "filename": "gone.txt", "type": 0, "parentFileId": 11, "trashed": 1}
        ]),
    )
    .await;
    common::mount_trash(&server).await;

    let (store, _) = common::mock_store(&server);
    store.rmdir(&rpath("/old")).await.unwrap();

    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/file/trash").await,
        1
    );
    let body = request_body(&server, "POST", "/api/v1/file/trash", 0).await;
    assert_eq!(body["fileIDs"], serde_json::json!([11]));
    // The cache entry for the removed directory is gone
    assert!(store.resolver().cache().get(&rpath("/old")).is_none());
}

// ============================================================================
// move
// ============================================================================

#[tokio::test]
async fn test_move_same_parent_issues_rename_only() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 11, "filename": "x", "type": 1, "parentFileId": 0}
        ]),
    )
    .await;
    common::mount_listing(
        &server,
        "11",
        serde_json::json!([
            {"fileId": 21, "filename": "y.bin", "type": 0, "size": 8,
             "etag": "900150983cd24fb0d6963f7d28e17f72", "parentFileId": 11}
        ]),
    )
    .await;
    common::mount_move(&server).await;
    common::mount_rename(&server).await;

    let (store, _) = common::mock_store(&server);
    let src = store.stat(&rpath("/x/y.bin")).await.unwrap();
    let moved = store.move_object(&src, &rpath("/x/z.bin")).await.unwrap();

    // Identity preserved under the new path
    assert_eq!(moved.id, src.id);
    assert_eq!(moved.size, src.size);
    assert_eq!(moved.md5, src.md5);
    assert_eq!(moved.path.as_str(), "/x/z.bin");

    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/file/move").await,
        0
    );
    assert_eq!(
        common::requests_for(&server, "PUT", "/api/v1/file/name").await,
        1
    );
    let body = request_body(&server, "PUT", "/api/v1/file/name", 0).await;
    assert_eq!(body["fileName"], serde_json::json!("z.bin"));
}

#[tokio::test]
async fn test_move_to_other_dir_issues_move_only() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 11, "filename": "x", "type": 1, "parentFileId": 0},
            {"fileId": 12, "filename": "y", "type": 1, "parentFileId": 0}
        ]),
    )
    .await;
    common::mount_listing(
        &server,
        "11",
        serde_json::json!([
            {"fileId": 21, "filename": "f.bin", "type": 0, "size": 8, "parentFileId": 11}
        ]),
    )
    .await;
    common::mount_move(&server).await;
    common::mount_rename(&server).await;

    let (store, _) = common::mock_store(&server);
    let src = store.stat(&rpath("/x/f.bin")).await.unwrap();
    let moved = store.move_object(&src, &rpath("/y/f.bin")).await.unwrap();

    assert_eq!(moved.parent_id.as_str(), "12");
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/file/move").await,
        1
    );
    assert_eq!(
        common::requests_for(&server, "PUT", "/api/v1/file/name").await,
        0
    );
}

// ============================================================================
// purge / cleanup
// ============================================================================

#[tokio::test]
async fn test_purge_trashes_children_before_parents() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 11, "filename": "x", "type": 1, "parentFileId": 0}
        ]),
    )
    .await;
    common::mount_listing(
        &server,
        "11",
        serde_json::json!([
            {"fileId": 21, "filename": "y.bin", "type": 0, "parentFileId": 11},
            {"fileId": 12, "filename": "sub", "type": 1, "parentFileId": 11}
        ]),
    )
    .await;
    common::mount_listing(
        &server,
        "12",
        serde_json::json!([
            {"fileId": 22, "filename": "z.bin", "type": 0, "parentFileId": 12}
        ]),
    )
    .await;
    common::mount_trash(&server).await;

    let (store, _) = common::mock_store(&server);
    store.purge(&rpath("/x")).await.unwrap();

    let body = request_body(&server, "POST", "/api/v1/file/trash", 0).await;
    // Deepest first: files and subdir contents before the subdir, the
    // purged directory itself last
    assert_eq!(body["fileIDs"], serde_json::json!([21, 22, 12, 11]));
    assert!(store.resolver().cache().get(&rpath("/x")).is_none());
}

#[tokio::test]
async fn test_clean_up_deletes_only_trashed_entries() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 31, "filename": "keep.txt", "type": 0, "parentFileId": 0},
            {"fileId": 32, "filename": "d", "type": 1, "parentFileId": 0},
            {"fileId": 34, "filename": "dead.txt", "type": 0, "parentFileId": 0, "trashed": 1}
        ]),
    )
    .await;
    common::mount_listing(
        &server,
        "32",
        serde_json::json!([
            {"fileId": 33, "filename": "old.txt", "type": 0, "parentFileId": 32, "trashed": 1}
        ]),
    )
    .await;
    common::mount_delete(&server).await;

    let (store, _) = common::mock_store(&server);
    store.clean_up().await.unwrap();

    let body = request_body(&server, "POST", "/api/v1/file/delete", 0).await;
    assert_eq!(body["fileIDs"], serde_json::json!([33, 34]));
}

// ============================================================================
// about / share / copy
// ============================================================================

#[tokio::test]
async fn test_about_reports_quota() {
    let server = MockServer::start().await;
    common::mount_user_info(&server, 0, 10_000, 2_500).await;

    let (store, _) = common::mock_store(&server);
    let quota = store.about().await.unwrap();

    assert_eq!(quota.total, 10_000);
    assert_eq!(quota.used, 2_500);
    assert_eq!(quota.free(), 7_500);
}

#[tokio::test]
async fn test_public_link_snaps_expiry() {
    let server = MockServer::start().await;
    common::mount_listing(
        &server,
        "0",
        serde_json::json!([
            {"fileId": 11, "filename": "shared", "type": 1, "parentFileId": 0}
        ]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/share/create"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::ok_envelope(serde_json::json!({ "shareKey": "abc123" }))),
        )
        .mount(&server)
        .await;

    let (store, _) = common::mock_store(&server);
    let url = store.public_link(&rpath("/shared"), 3, false).await.unwrap();

    assert_eq!(url, "https://www.123pan.com/s/abc123");
    let body = request_body(&server, "POST", "/api/v1/share/create", 0).await;
    // Three days snaps up to the seven-day step
    assert_eq!(body["shareExpire"], serde_json::json!(7));
    assert_eq!(body["fileIDList"], serde_json::json!([11]));
}

#[tokio::test]
async fn test_copy_succeeds_via_instant_upload() {
    let server = MockServer::start().await;
    common::mount_upload_create_instant(&server, 777).await;

    let (store, _) = common::mock_store(&server);
    let src = sample_source_object();
    let copied = store.copy_object(&src, &rpath("/copy.bin")).await.unwrap();

    assert_eq!(copied.id.as_str(), "777");
    assert_eq!(copied.md5, src.md5);
    assert_eq!(copied.size, src.size);
    // No bytes moved
    assert_eq!(
        common::requests_for(&server, "POST", "/upload/v1/file/slice").await,
        0
    );
}

#[tokio::test]
async fn test_copy_falls_back_when_server_lacks_bytes() {
    let server = MockServer::start().await;
    common::mount_upload_create_slices(&server, "pre-copy", 4 * 1024 * 1024).await;
    common::mount_abort(&server).await;

    let (store, _) = common::mock_store(&server);
    let src = sample_source_object();
    let err = store
        .copy_object(&src, &rpath("/copy.bin"))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::CantCopy(_)));
    // The probe's pending preupload was released
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/upload/abort").await,
        1
    );
}

#[tokio::test]
async fn test_copy_without_hash_is_refused() {
    let server = MockServer::start().await;
    let (store, _) = common::mock_store(&server);

    let mut src = sample_source_object();
    src.md5 = None;
    let err = store
        .copy_object(&src, &rpath("/copy.bin"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::CantCopy(_)));
}

/// A populated source object rooted directly under /
fn sample_source_object() -> openpan_core::domain::entry::ObjectInfo {
    openpan_core::domain::entry::ObjectInfo {
        id: FileId::from(21u64),
        path: rpath("/src.bin"),
        size: 2048,
        mod_time: None,
        md5: Some(Md5Hash::new("900150983cd24fb0d6963f7d28e17f72".to_string()).unwrap()),
        parent_id: FileId::root(),
        trashed: false,
        fetched: true,
    }
}
