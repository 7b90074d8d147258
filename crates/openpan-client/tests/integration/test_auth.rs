//! Integration tests for the credential broker
//!
//! Verifies token exchange, single-flight refresh under concurrency,
//! and persistence of refreshed state to the config store.

use std::sync::Arc;

use openpan_client::client::PanClient;
use openpan_core::config::{MemoryConfigStore, RemoteConfig};
use openpan_core::ports::config_store::IConfigStore;
use wiremock::MockServer;

use crate::common;

/// A client whose cached token is already expired
fn expired_client(server: &MockServer) -> (Arc<PanClient>, Arc<MemoryConfigStore>) {
    let mut config = RemoteConfig::new("test-client-id", "test-client-secret");
    config.access_token = Some("expired-token".to_string());
    config.token_expiry = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    config.base_url = Some(server.uri());
    let config_store = Arc::new(MemoryConfigStore::new(config.clone()));
    (
        Arc::new(PanClient::new(&config, config_store.clone())),
        config_store,
    )
}

#[tokio::test]
async fn test_expired_token_triggers_exchange() {
    let server = MockServer::start().await;
    common::mount_token(&server, "fresh-token").await;

    let (client, _) = expired_client(&server);
    let token = client.broker().access_token().await.unwrap();

    assert_eq!(token, "fresh-token");
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/access_token").await,
        1
    );
}

#[tokio::test]
async fn test_refreshed_state_is_persisted() {
    let server = MockServer::start().await;
    common::mount_token(&server, "fresh-token").await;

    let (client, config_store) = expired_client(&server);
    client.broker().access_token().await.unwrap();

    assert_eq!(config_store.save_count(), 1);
    let persisted = config_store.load().unwrap();
    assert_eq!(persisted.access_token.as_deref(), Some("fresh-token"));
    assert!(persisted.token_expiry.unwrap() > chrono::Utc::now());
}

#[tokio::test]
async fn test_concurrent_callers_observe_one_refresh() {
    let server = MockServer::start().await;
    common::mount_token(&server, "fresh-token").await;

    let (client, _) = expired_client(&server);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.broker().access_token().await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "fresh-token");
    }

    // Exactly one exchange despite eight concurrent callers
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/access_token").await,
        1
    );
    assert_eq!(client.broker().exchange_count(), 1);
}

#[tokio::test]
async fn test_refresh_raises_just_refreshed_flag() {
    let server = MockServer::start().await;
    common::mount_token(&server, "fresh-token").await;

    let (client, _) = expired_client(&server);
    client.broker().access_token().await.unwrap();

    assert!(client.broker().take_just_refreshed());
    // Consumed: a second take sees nothing
    assert!(!client.broker().take_just_refreshed());
}

#[tokio::test]
async fn test_fresh_token_skips_exchange() {
    let server = MockServer::start().await;
    common::mount_token(&server, "should-not-be-used").await;

    let client = common::mock_client(&server);
    let token = client.broker().access_token().await.unwrap();

    assert_eq!(token, "test-access-token");
    assert_eq!(
        common::requests_for(&server, "POST", "/api/v1/access_token").await,
        0
    );
}
