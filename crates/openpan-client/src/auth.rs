//! Credential broker for the provider's open platform
//!
//! Exchanges (client_id, client_secret) for a bearer token at the
//! provider's access-token endpoint, tracks the token's absolute expiry,
//! refreshes it when less than the early-refresh margin remains, and
//! persists refreshed state through the configuration store.
//!
//! Refresh is serialized: a single `tokio::sync::Mutex` protects the
//! token cell, so one caller performs the exchange while the rest block
//! and observe the fresh token on release. Persistence happens inside
//! the critical section, so a subsequent process sees either the old or
//! the new (token, expiry) pair, never a mixture.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use openpan_core::config::RemoteConfig;
use openpan_core::ports::config_store::{IConfigStore, PersistedState};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::ApiEnvelope;
use crate::pacer::{ApiCategory, PacerTable};
use crate::PanError;

/// Refresh when less than this much lifetime remains
const EARLY_REFRESH_MARGIN: Duration = Duration::minutes(5);

/// Assumed lifetime when the provider's expiry cannot be parsed
///
/// Provider tokens normally last much longer; a day is the conservative
/// assumption that forces an early re-exchange rather than a late one.
const FALLBACK_TOKEN_LIFETIME: Duration = Duration::hours(24);

/// Access-token endpoint path
const TOKEN_PATH: &str = "/api/v1/access_token";

// ============================================================================
// Wire types
// ============================================================================

/// Request body for the access-token exchange
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    /// Application client id
    client_id: &'a str,
    /// Application client secret
    client_secret: &'a str,
}

/// Payload of a successful access-token exchange
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    /// The bearer token
    access_token: String,
    /// Absolute expiry as an RFC 3339 timestamp
    expired_at: Option<String>,
}

// ============================================================================
// CredentialBroker
// ============================================================================

/// Cached token cell, protected by the broker's mutex
#[derive(Debug, Default)]
struct TokenState {
    token: Option<String>,
    expiry: Option<DateTime<Utc>>,
}

/// Obtains, caches, refreshes, and persists the bearer token
pub struct CredentialBroker {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    pacers: Arc<PacerTable>,
    config_store: Arc<dyn IConfigStore>,
    state: Mutex<TokenState>,
    /// Set on every refresh; consumed by tier re-detection
    just_refreshed: AtomicBool,
    /// Most recently observed tier level, persisted alongside the token
    tier_level: AtomicI32,
    /// Number of exchanges performed (test observability)
    exchanges: AtomicI32,
}

impl CredentialBroker {
    /// Create a broker seeded from the remote configuration
    pub fn new(
        config: &RemoteConfig,
        http: reqwest::Client,
        base_url: String,
        pacers: Arc<PacerTable>,
        config_store: Arc<dyn IConfigStore>,
    ) -> Self {
        Self {
            http,
            base_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            pacers,
            config_store,
            state: Mutex::new(TokenState {
                token: config.access_token.clone(),
                expiry: config.token_expiry,
            }),
            just_refreshed: AtomicBool::new(false),
            tier_level: AtomicI32::new(config.tier_level),
            exchanges: AtomicI32::new(0),
        }
    }

    /// Return a valid bearer token, refreshing if necessary
    ///
    /// Concurrent callers serialize on the internal mutex; at most one
    /// exchange is in flight at a time.
    pub async fn access_token(&self) -> Result<String, PanError> {
        let mut state = self.state.lock().await;

        if let (Some(token), Some(expiry)) = (&state.token, state.expiry) {
            if expiry - Utc::now() > EARLY_REFRESH_MARGIN {
                return Ok(token.clone());
            }
            debug!("cached token within early-refresh margin, refreshing");
        }

        self.refresh_locked(&mut state).await
    }

    /// Discard the cached token and obtain a fresh one
    ///
    /// Used by the RPC envelope when the provider reports an expired
    /// token despite the cached expiry claiming otherwise.
    pub async fn force_refresh(&self) -> Result<String, PanError> {
        let mut state = self.state.lock().await;
        state.token = None;
        state.expiry = None;
        self.refresh_locked(&mut state).await
    }

    /// Perform the credential exchange while holding the token lock
    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String, PanError> {
        self.pacers.pacer(ApiCategory::AccessToken).wait().await;

        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let request = TokenRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
        };

        let envelope: ApiEnvelope<TokenData> = self
            .http
            .post(&url)
            .header("Platform", "open_platform")
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if envelope.code != 0 {
            return Err(PanError::TokenExchange(format!(
                "code {}: {}",
                envelope.code, envelope.message
            )));
        }

        let data = envelope
            .data
            .ok_or_else(|| PanError::TokenExchange("missing token payload".to_string()))?;

        let expiry = parse_expiry(data.expired_at.as_deref());
        state.token = Some(data.access_token.clone());
        state.expiry = Some(expiry);
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.just_refreshed.store(true, Ordering::SeqCst);

        // Persist inside the critical section so readers never observe a
        // token without its expiry.
        self.persist(&data.access_token, expiry);

        info!(expiry = %expiry, "access token refreshed");
        Ok(data.access_token)
    }

    /// Write the current persisted trio through the config store
    fn persist(&self, token: &str, expiry: DateTime<Utc>) {
        let persisted = PersistedState {
            access_token: token.to_string(),
            token_expiry: expiry,
            tier_level: self.tier_level.load(Ordering::SeqCst),
        };
        if let Err(e) = self.config_store.save_state(&persisted) {
            warn!(error = %e, "failed to persist refreshed token");
        }
    }

    /// Record a newly observed tier level and persist it
    pub async fn note_tier(&self, level: i32) {
        self.tier_level.store(level, Ordering::SeqCst);
        let state = self.state.lock().await;
        if let (Some(token), Some(expiry)) = (&state.token, state.expiry) {
            self.persist(token, expiry);
        }
    }

    /// The most recently observed tier level (-1 when unknown)
    #[must_use]
    pub fn tier_level(&self) -> i32 {
        self.tier_level.load(Ordering::SeqCst)
    }

    /// Consume the just-refreshed flag
    ///
    /// Returns true exactly once per refresh, so tier detection can
    /// re-evaluate after the account may have changed.
    #[must_use]
    pub fn take_just_refreshed(&self) -> bool {
        self.just_refreshed.swap(false, Ordering::SeqCst)
    }

    /// Number of exchanges performed so far (test observability)
    #[must_use]
    pub fn exchange_count(&self) -> i32 {
        self.exchanges.load(Ordering::SeqCst)
    }
}

/// Parse the provider's RFC 3339 expiry, falling back conservatively
fn parse_expiry(raw: Option<&str>) -> DateTime<Utc> {
    match raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
        Some(parsed) => parsed.with_timezone(&Utc),
        None => {
            warn!(raw = ?raw, "unparseable token expiry, using fallback lifetime");
            Utc::now() + FALLBACK_TOKEN_LIFETIME
        }
    }
}
