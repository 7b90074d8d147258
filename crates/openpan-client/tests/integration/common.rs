//! Shared test helpers for provider API integration tests
//!
//! Provides wiremock-based mock server setup for the open API endpoints.
//! Each helper mounts one endpoint family; tests compose the set they
//! need and build a `PanStore` (or bare `PanClient`) pointed at the mock
//! server with a pre-seeded, long-lived access token.

use std::sync::Arc;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use openpan_client::client::PanClient;
use openpan_client::store::PanStore;
use openpan_core::config::{MemoryConfigStore, RemoteConfig};

/// A remote config aimed at the mock server with a fresh cached token
pub fn mock_config(server: &MockServer) -> RemoteConfig {
    let mut config = RemoteConfig::new("test-client-id", "test-client-secret");
    config.access_token = Some("test-access-token".to_string());
    config.token_expiry = Some(chrono::Utc::now() + chrono::Duration::hours(1));
    config.base_url = Some(server.uri());
    config
}

/// A store over the mock server, plus its observable config store
pub fn mock_store(server: &MockServer) -> (PanStore, Arc<MemoryConfigStore>) {
    let config = mock_config(server);
    let config_store = Arc::new(MemoryConfigStore::new(config.clone()));
    let store = PanStore::new(config, config_store.clone()).unwrap();
    (store, config_store)
}

/// A bare client over the mock server
pub fn mock_client(server: &MockServer) -> Arc<PanClient> {
    let config = mock_config(server);
    let config_store = Arc::new(MemoryConfigStore::new(config.clone()));
    Arc::new(PanClient::new(&config, config_store))
}

/// Wrap a payload in the provider's success envelope
pub fn ok_envelope(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "code": 0, "message": "ok", "data": data })
}

/// A bare success envelope for unit operations
pub fn unit_envelope() -> serde_json::Value {
    serde_json::json!({ "code": 0, "message": "ok" })
}

/// Mount a single-page listing for one parent id
pub async fn mount_listing(server: &MockServer, parent: &str, entries: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", parent))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!({
            "lastFileId": -1,
            "fileList": entries
        }))))
        .mount(server)
        .await;
}

/// Mount the access-token exchange endpoint
pub async fn mount_token(server: &MockServer, token: &str) {
    let expiry = (chrono::Utc::now() + chrono::Duration::days(30)).to_rfc3339();
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!({
            "accessToken": token,
            "expiredAt": expiry
        }))))
        .mount(server)
        .await;
}

/// Mount the user-info endpoint with the given tier and quota
pub async fn mount_user_info(server: &MockServer, vip_level: i32, total: u64, used: u64) {
    Mock::given(method("GET"))
        .and(path("/api/v1/user/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!({
            "uid": 424242,
            "vipLevel": vip_level,
            "spaceTotal": total,
            "spaceUsed": used
        }))))
        .mount(server)
        .await;
}

/// Mount the mkdir endpoint, returning sequential ids is up to the caller
pub async fn mount_mkdir(server: &MockServer, dir_id: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/file/mkdir"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_envelope(serde_json::json!({ "dirID": dir_id }))),
        )
        .mount(server)
        .await;
}

/// Mount the batch trash endpoint
pub async fn mount_trash(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/file/trash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(unit_envelope()))
        .mount(server)
        .await;
}

/// Mount the batch permanent-delete endpoint
pub async fn mount_delete(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/file/delete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(unit_envelope()))
        .mount(server)
        .await;
}

/// Mount the move endpoint
pub async fn mount_move(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/file/move"))
        .respond_with(ResponseTemplate::new(200).set_body_json(unit_envelope()))
        .mount(server)
        .await;
}

/// Mount the rename endpoint
pub async fn mount_rename(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/api/v1/file/name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(unit_envelope()))
        .mount(server)
        .await;
}

/// Mount an upload-create response for the non-instant path
pub async fn mount_upload_create_slices(
    server: &MockServer,
    preupload_id: &str,
    slice_size: u64,
) {
    Mock::given(method("POST"))
        .and(path("/api/v1/upload/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!({
            "reuse": false,
            "fileID": 0,
            "preuploadID": preupload_id,
            "sliceSize": slice_size,
            "servers": [server.uri()]
        }))))
        .mount(server)
        .await;
}

/// Mount an upload-create response that deduplicates instantly
pub async fn mount_upload_create_instant(server: &MockServer, file_id: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/upload/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(serde_json::json!({
            "reuse": true,
            "fileID": file_id
        }))))
        .mount(server)
        .await;
}

/// Mount the slice endpoint on the upload server (same mock server here)
pub async fn mount_slice(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/upload/v1/file/slice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(unit_envelope()))
        .mount(server)
        .await;
}

/// Mount a completion response that reports the file immediately
pub async fn mount_complete(server: &MockServer, file_id: u64, etag: Option<&str>) {
    let mut data = serde_json::json!({ "completed": true, "fileID": file_id });
    if let Some(etag) = etag {
        data["etag"] = serde_json::json!(etag);
    }
    Mock::given(method("POST"))
        .and(path("/api/v1/upload/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(data)))
        .mount(server)
        .await;
}

/// Mount the best-effort upload abort endpoint
pub async fn mount_abort(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/upload/abort"))
        .respond_with(ResponseTemplate::new(200).set_body_json(unit_envelope()))
        .mount(server)
        .await;
}

/// Count the requests received for a method/path pair
pub async fn requests_for(server: &MockServer, http_method: &str, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| {
            r.method.to_string().eq_ignore_ascii_case(http_method) && r.url.path() == url_path
        })
        .count()
}
