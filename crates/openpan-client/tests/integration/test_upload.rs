//! Integration tests for the chunked upload engine
//!
//! Exercises the create/slice/complete protocol end to end against the
//! mock provider: slicing, instant upload, parent creation, hash
//! verification, and cancellation.

use std::time::Duration;

use openpan_core::domain::errors::StoreError;
use openpan_core::domain::newtypes::{FileId, RemotePath};
use openpan_core::ports::remote_store::{IRemoteStore, PutSource};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

fn rpath(s: &str) -> RemotePath {
    RemotePath::new(s.to_string()).unwrap()
}

fn source_of(bytes: Vec<u8>) -> PutSource {
    let size = bytes.len() as u64;
    PutSource::new(std::io::Cursor::new(bytes), size)
}

#[tokio::test]
async fn test_put_slices_and_completes() {
    let server = MockServer::start().await;
    common::mount_upload_create_slices(&server, "pre-1", 4).await;
    common::mount_slice(&server).await;
    common::mount_complete(&server, 901, None).await;

    let (store, _) = common::mock_store(&server);
    let object = store
        .put(source_of(vec![0x41; 10]), &rpath("/f.bin"))
        .await
        .unwrap();

    assert_eq!(object.id.as_str(), "901");
    assert_eq!(object.size, 10);
    // MD5 of ten 'A' bytes
    assert_eq!(
        object.md5.unwrap().as_str(),
        "16c52c6e8326c071da771e66dc6e9e57"
    );
    assert!(object.mod_time.is_some());

    // Ten bytes at a four-byte slice size is three slices
    assert_eq!(
        common::requests_for(&server, "POST", "/upload/v1/file/slice").await,
        3
    );
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/upload/complete").await,
        1
    );
}

#[tokio::test]
async fn test_put_instant_upload_skips_slices() {
    let server = MockServer::start().await;
    common::mount_upload_create_instant(&server, 902).await;
    common::mount_slice(&server).await;

    let (store, _) = common::mock_store(&server);
    let object = store
        .put(source_of(vec![0x42; 64]), &rpath("/dup.bin"))
        .await
        .unwrap();

    assert_eq!(object.id.as_str(), "902");
    // The server already held the bytes: no slice endpoint traffic
    assert_eq!(
        common::requests_for(&server, "POST", "/upload/v1/file/slice").await,
        0
    );
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/upload/complete").await,
        0
    );
}

#[tokio::test]
async fn test_put_creates_missing_parents() {
    let server = MockServer::start().await;
    common::mount_listing(&server, "0", serde_json::json!([])).await;
    common::mount_mkdir(&server, 11).await;
    common::mount_upload_create_instant(&server, 903).await;

    let (store, _) = common::mock_store(&server);
    let object = store
        .put(source_of(vec![1, 2, 3, 4]), &rpath("/x/y.bin"))
        .await
        .unwrap();

    assert_eq!(object.parent_id.as_str(), "11");
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/file/mkdir").await,
        1
    );
}

#[tokio::test]
async fn test_put_eight_slices_for_eight_slice_sized_content() {
    let server = MockServer::start().await;
    common::mount_upload_create_slices(&server, "pre-8", 4).await;
    common::mount_slice(&server).await;
    common::mount_complete(&server, 904, None).await;

    let (store, _) = common::mock_store(&server);
    store
        .put(source_of(vec![7u8; 32]), &rpath("/eight.bin"))
        .await
        .unwrap();

    assert_eq!(
        common::requests_for(&server, "POST", "/upload/v1/file/slice").await,
        8
    );
}

#[tokio::test]
async fn test_slice_failure_retries_then_succeeds() {
    let server = MockServer::start().await;
    common::mount_upload_create_slices(&server, "pre-r", 16).await;

    // First slice attempt fails at the transport level, the retry lands
    Mock::given(method("POST"))
        .and(path("/upload/v1/file/slice"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    common::mount_slice(&server).await;
    common::mount_complete(&server, 905, None).await;

    let (store, _) = common::mock_store(&server);
    let object = store
        .put(source_of(vec![9u8; 8]), &rpath("/retry.bin"))
        .await
        .unwrap();

    assert_eq!(object.id.as_str(), "905");
    assert_eq!(
        common::requests_for(&server, "POST", "/upload/v1/file/slice").await,
        2
    );
}

#[tokio::test]
async fn test_provider_hash_disagreement_is_fatal_after_retries() {
    let server = MockServer::start().await;
    common::mount_upload_create_slices(&server, "pre-bad", 16).await;
    common::mount_slice(&server).await;
    // The provider reports a hash that cannot match the content
    common::mount_complete(&server, 906, Some("00000000000000000000000000000000")).await;

    let (store, _) = common::mock_store(&server);
    let err = store
        .put(source_of(vec![5u8; 8]), &rpath("/bad.bin"))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::HashMismatch { .. }));
    // The create probe was retried to its budget
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/upload/create").await,
        3
    );
}

#[tokio::test]
async fn test_cancellation_mid_upload_aborts_preupload() {
    let server = MockServer::start().await;
    common::mount_upload_create_slices(&server, "pre-c", 2).await;
    common::mount_abort(&server).await;
    common::mount_complete(&server, 907, None).await;

    // Slices hang long enough for the cancellation to land first
    Mock::given(method("POST"))
        .and(path("/upload/v1/file/slice"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::unit_envelope())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let client = common::mock_client(&server);
    let cancel = CancellationToken::new();
    let dest = rpath("/cancelled.bin");

    let upload_task = {
        let client = client.clone();
        let cancel = cancel.clone();
        let dest = dest.clone();
        tokio::spawn(async move {
            openpan_client::upload::upload(
                &client,
                &FileId::root(),
                "cancelled.bin",
                &dest,
                source_of(vec![3u8; 8]),
                2,
                &cancel,
            )
            .await
        })
    };

    // Let the slice requests get in flight, then pull the plug
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    let result = upload_task.await.unwrap();
    assert!(matches!(result, Err(StoreError::Cancelled)));

    // The pending preupload was released, and completion never ran
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/upload/abort").await,
        1
    );
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/upload/complete").await,
        0
    );
}

#[tokio::test]
async fn test_put_then_put_same_bytes_dedupes() {
    let server = MockServer::start().await;

    // First put transfers; every later probe is answered with reuse
    Mock::given(method("POST"))
        .and(path("/api/v1/upload/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::ok_envelope(
            serde_json::json!({
                "reuse": false,
                "fileID": 0,
                "preuploadID": "pre-first",
                "sliceSize": 16,
                "servers": [server.uri()]
            }),
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/upload/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::ok_envelope(
            serde_json::json!({ "reuse": true, "fileID": 910 }),
        )))
        .mount(&server)
        .await;
    common::mount_slice(&server).await;
    common::mount_complete(&server, 909, None).await;

    let (store, _) = common::mock_store(&server);
    let bytes = vec![0x5a; 12];

    let first = store
        .put(source_of(bytes.clone()), &rpath("/same.bin"))
        .await
        .unwrap();
    let slices_after_first =
        common::requests_for(&server, "POST", "/upload/v1/file/slice").await;

    let second = store
        .put(source_of(bytes), &rpath("/same.bin"))
        .await
        .unwrap();
    let slices_after_second =
        common::requests_for(&server, "POST", "/upload/v1/file/slice").await;

    // Same hash either way; the second put moved no bytes
    assert_eq!(first.md5, second.md5);
    assert_eq!(slices_after_first, slices_after_second);
}
