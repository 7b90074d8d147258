//! Integration tests for retry classification and rate-limit recovery
//!
//! Drives the RPC envelope through synthetic throttle and failure
//! sequences and verifies backoff, recovery, and tier re-detection.

use std::time::{Duration, Instant};

use openpan_core::domain::entry::AccountTier;
use openpan_core::domain::errors::StoreError;
use openpan_core::domain::newtypes::RemotePath;
use openpan_core::ports::remote_store::IRemoteStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

/// Mount a listing endpoint that fails `failures` times before succeeding
async fn mount_flaky_listing(server: &MockServer, status: u16, failures: u64) {
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(failures)
        .mount(server)
        .await;

    common::mount_listing(server, "0", serde_json::json!([])).await;
}

#[tokio::test]
async fn test_http_429_then_200_recovers_with_backoff() {
    let server = MockServer::start().await;
    mount_flaky_listing(&server, 429, 1).await;
    common::mount_user_info(&server, 0, 0, 0).await;

    let (store, _) = common::mock_store(&server);
    let start = Instant::now();
    let entries = store.list(&RemotePath::root()).await.unwrap();
    let elapsed = start.elapsed();

    assert!(entries.is_empty());
    // The retry waited at least one base backoff interval
    assert!(
        elapsed >= Duration::from_millis(400),
        "recovered too fast: {elapsed:?}"
    );
    assert_eq!(
        common::requests_for(&server, "GET", "/api/v2/file/list").await,
        2
    );
}

#[tokio::test]
async fn test_http_503_then_200_recovers() {
    let server = MockServer::start().await;
    mount_flaky_listing(&server, 503, 1).await;

    let (store, _) = common::mock_store(&server);
    let entries = store.list(&RemotePath::root()).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_api_code_429_retries_and_triggers_tier_recheck() {
    let server = MockServer::start().await;

    // First response: API-level 429 envelope; then an empty listing
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 429,
            "message": "request too frequent"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    common::mount_listing(&server, "0", serde_json::json!([])).await;
    common::mount_user_info(&server, 1, 1000, 10).await;

    let (store, _) = common::mock_store(&server);
    let root = RemotePath::root();

    // The first list recovers from the 429 by itself
    store.list(&root).await.unwrap();

    // The next operation performs the scheduled tier re-detection
    store.list(&root).await.unwrap();

    assert_eq!(
        common::requests_for(&server, "GET", "/api/v1/user/info").await,
        1
    );
    assert_eq!(store.client().current_tier(), AccountTier::Premium);
}

#[tokio::test]
async fn test_fatal_api_code_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 5113,
            "message": "daily traffic exceeded"
        })))
        .mount(&server)
        .await;

    let (store, _) = common::mock_store(&server);
    let err = store.list(&RemotePath::root()).await.unwrap_err();

    match err {
        StoreError::Api { code, message } => {
            assert_eq!(code, 5113);
            assert!(message.contains("daily traffic"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    // One request, no retries
    assert_eq!(
        common::requests_for(&server, "GET", "/api/v2/file/list").await,
        1
    );
}

#[tokio::test]
async fn test_api_401_forces_one_refresh_then_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 401,
            "message": "access token is expired"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    common::mount_listing(&server, "0", serde_json::json!([])).await;
    common::mount_token(&server, "reissued-token").await;
    common::mount_user_info(&server, 0, 0, 0).await;

    let (store, _) = common::mock_store(&server);
    let entries = store.list(&RemotePath::root()).await.unwrap();

    assert!(entries.is_empty());
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/access_token").await,
        1
    );
}
