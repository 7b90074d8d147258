//! Paced, retrying RPC envelope for the provider API
//!
//! Every API call flows through [`PanClient::call`], which:
//! 1. Obtains a valid bearer token from the credential broker
//! 2. Waits on the pacer for the call's endpoint category
//! 3. Sends the HTTP request with the uniform header set
//! 4. Classifies the outcome: transport failures and HTTP 429/5xx/509
//!    retry with jittered backoff; token expiry triggers exactly one
//!    forced refresh; API-level 429 backs off and schedules a tier
//!    re-detection; any other non-zero code is surfaced as a typed error
//!
//! The response body is always the provider's JSON envelope
//! `{code, message, data}` with `code == 0` meaning success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use openpan_core::config::RemoteConfig;
use openpan_core::domain::entry::{AccountTier, Quota};
use openpan_core::domain::newtypes::FileId;
use openpan_core::ports::config_store::IConfigStore;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::CredentialBroker;
use crate::pacer::{jittered_backoff, ApiCategory, PacerTable};
use crate::PanError;

/// Default API base URL
const DEFAULT_BASE_URL: &str = "https://open-api.123pan.com";

/// Retry budget for a single logical call
const MAX_CALL_RETRIES: u32 = 10;

/// Base delay for the jittered retry backoff
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Ceiling for the jittered retry backoff
const RETRY_MAX: Duration = Duration::from_secs(10);

/// HTTP statuses that are always retryable
const RETRY_STATUS: &[u16] = &[429, 500, 502, 503, 504, 509];

/// User-info endpoint path
const USER_INFO_PATH: &str = "/api/v1/user/info";

/// Download-info endpoint path
const DOWNLOAD_INFO_PATH: &str = "/api/v1/file/download_info";

// ============================================================================
// Response envelope
// ============================================================================

/// The provider's uniform JSON response envelope
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    /// Zero on success; any other value is an API error
    pub code: i64,
    /// Human-readable status, empty on success
    #[serde(default)]
    pub message: String,
    /// Operation payload; absent for unit operations and on errors
    #[serde(default)]
    pub data: Option<T>,
}

/// Returns true if the envelope signals an expired or rejected token
fn is_token_error(code: i64, message: &str) -> bool {
    code == 401 || message.to_ascii_lowercase().contains("access token")
}

/// Returns true if the transport error is worth retrying
fn is_transient_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Parse a provider id into the numeric form the wire expects
///
/// Ids are normalised to strings everywhere inside the core; this
/// provider renders them as JSON integers in request bodies.
pub(crate) fn numeric_id(id: &FileId) -> Result<i64, PanError> {
    id.as_str()
        .parse::<i64>()
        .map_err(|_| PanError::InvalidResponse(format!("non-numeric file id: {id}")))
}

// ============================================================================
// User info
// ============================================================================

/// Payload of the user-info endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoData {
    /// Account identifier
    #[allow(dead_code)]
    pub uid: Option<u64>,
    /// Paid tier level; zero means a free account
    #[serde(default)]
    pub vip_level: i32,
    /// Total storage in bytes
    #[serde(default)]
    pub space_total: u64,
    /// Used storage in bytes
    #[serde(default)]
    pub space_used: u64,
}

impl UserInfoData {
    /// The account tier implied by the vip level
    #[must_use]
    pub fn tier(&self) -> AccountTier {
        AccountTier::from_level(self.vip_level)
    }

    /// The storage quota
    #[must_use]
    pub fn quota(&self) -> Quota {
        Quota {
            total: self.space_total,
            used: self.space_used,
        }
    }
}

/// Payload of the download-info endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadInfoData {
    /// One-shot pre-signed download URL
    download_url: String,
}

// ============================================================================
// PanClient
// ============================================================================

/// The authenticated, paced, retrying HTTP client for the provider API
///
/// Owns the credential broker and the pacer table; shared via `Arc`
/// across the resolver, listing, and upload modules.
pub struct PanClient {
    http: reqwest::Client,
    base_url: String,
    broker: CredentialBroker,
    pacers: Arc<PacerTable>,
    /// Raised on the first API-level 429 of a call; consumed by
    /// `maybe_recheck_tier`
    tier_recheck: AtomicBool,
}

impl PanClient {
    /// Build a client from the remote configuration
    pub fn new(config: &RemoteConfig, config_store: Arc<dyn IConfigStore>) -> Self {
        let http = reqwest::Client::new();
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let pacers = Arc::new(PacerTable::new(AccountTier::from_level(config.tier_level)));
        let broker = CredentialBroker::new(
            config,
            http.clone(),
            base_url.clone(),
            pacers.clone(),
            config_store,
        );

        Self {
            http,
            base_url,
            broker,
            pacers,
            tier_recheck: AtomicBool::new(false),
        }
    }

    /// The underlying HTTP client, for requests to absolute URLs
    /// (upload servers, pre-signed download URLs)
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The API base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The credential broker
    #[must_use]
    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    /// The currently effective account tier
    #[must_use]
    pub fn current_tier(&self) -> AccountTier {
        AccountTier::from_level(self.broker.tier_level())
    }

    // ------------------------------------------------------------------
    // The call loop
    // ------------------------------------------------------------------

    /// Issue one logical API call with pacing, auth, and retries
    ///
    /// Returns the envelope's `data` payload, which is absent for unit
    /// operations. Use the typed wrappers below instead of calling this
    /// directly.
    async fn call<T: DeserializeOwned>(
        &self,
        category: ApiCategory,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Option<T>, PanError> {
        let url = format!("{}{}", self.base_url, path);
        let pacer = self.pacers.pacer(category);
        let mut refreshed = false;
        let mut last_failure = String::new();

        for attempt in 0..MAX_CALL_RETRIES {
            let token = self.broker.access_token().await?;
            pacer.wait().await;

            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header("Platform", "open_platform");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if is_transient_transport(&e) => {
                    last_failure = e.to_string();
                    pacer.on_failure();
                    let delay = jittered_backoff(attempt, RETRY_BASE, RETRY_MAX);
                    warn!(path, attempt, error = %e, "transport failure, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if RETRY_STATUS.contains(&status.as_u16()) {
                if status == StatusCode::TOO_MANY_REQUESTS {
                    // Pacing to the wrong tier's ceiling is the usual cause
                    self.request_tier_recheck();
                }
                last_failure = format!("HTTP status {status}");
                pacer.on_failure();
                let delay = jittered_backoff(attempt, RETRY_BASE, RETRY_MAX);
                info!(
                    path,
                    attempt,
                    status = status.as_u16(),
                    delay_ms = delay.as_millis() as u64,
                    "retryable HTTP status, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                if !refreshed {
                    debug!(path, "HTTP 401, forcing token refresh");
                    self.broker.force_refresh().await?;
                    refreshed = true;
                    continue;
                }
                return Err(PanError::Http(status));
            }

            if !status.is_success() {
                return Err(PanError::Http(status));
            }

            let envelope: ApiEnvelope<T> = response
                .json()
                .await
                .map_err(|e| PanError::InvalidResponse(format!("bad envelope for {path}: {e}")))?;

            match envelope.code {
                0 => {
                    pacer.on_success();
                    if attempt > 0 {
                        info!(path, attempt, "call succeeded after retry");
                    }
                    return Ok(envelope.data);
                }
                code if is_token_error(code, &envelope.message) => {
                    if refreshed {
                        return Err(PanError::Api {
                            code,
                            message: envelope.message,
                        });
                    }
                    debug!(path, code, "token rejected, forcing refresh");
                    self.broker.force_refresh().await?;
                    refreshed = true;
                }
                429 => {
                    last_failure = format!("API code 429: {}", envelope.message);
                    // The ceiling we paced to was evidently wrong; the
                    // account tier may have changed.
                    self.request_tier_recheck();
                    pacer.on_failure();
                    let delay = jittered_backoff(attempt, RETRY_BASE, RETRY_MAX);
                    info!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "API rate limit, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                code => {
                    return Err(PanError::Api {
                        code,
                        message: envelope.message,
                    });
                }
            }
        }

        Err(PanError::RetriesExhausted {
            attempts: MAX_CALL_RETRIES,
            last: last_failure,
        })
    }

    /// GET returning a required payload
    pub async fn get_data<T: DeserializeOwned>(
        &self,
        category: ApiCategory,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, PanError> {
        self.call(category, Method::GET, path, query, None)
            .await?
            .ok_or_else(|| PanError::InvalidResponse(format!("missing payload for {path}")))
    }

    /// POST returning a required payload
    pub async fn post_data<T: DeserializeOwned>(
        &self,
        category: ApiCategory,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, PanError> {
        self.call(category, Method::POST, path, &[], Some(&body))
            .await?
            .ok_or_else(|| PanError::InvalidResponse(format!("missing payload for {path}")))
    }

    /// POST where only the envelope code matters
    pub async fn post_unit(
        &self,
        category: ApiCategory,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(), PanError> {
        self.call::<serde_json::Value>(category, Method::POST, path, &[], Some(&body))
            .await
            .map(|_| ())
    }

    /// PUT where only the envelope code matters
    pub async fn put_unit(
        &self,
        category: ApiCategory,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(), PanError> {
        self.call::<serde_json::Value>(category, Method::PUT, path, &[], Some(&body))
            .await
            .map(|_| ())
    }

    // ------------------------------------------------------------------
    // Tier detection
    // ------------------------------------------------------------------

    /// Request a tier re-detection at the next opportunity
    pub(crate) fn request_tier_recheck(&self) {
        self.tier_recheck.store(true, Ordering::SeqCst);
    }

    /// Re-detect the account tier if a refresh or rate limit asked for it
    ///
    /// Cheap when no re-check is pending. Detection failures are logged
    /// and swallowed: the current pacing stays in effect.
    pub async fn maybe_recheck_tier(&self) {
        let pending =
            self.broker.take_just_refreshed() | self.tier_recheck.swap(false, Ordering::SeqCst);
        if !pending {
            return;
        }

        match self.user_info().await {
            Ok(info) => {
                let tier = info.tier();
                info!(tier = ?tier, "tier re-detected");
                self.pacers.rebind(tier);
                self.broker.note_tier(info.vip_level).await;
            }
            Err(e) => warn!(error = %e, "tier re-detection failed"),
        }
    }

    /// Fetch the account profile and quota
    pub async fn user_info(&self) -> Result<UserInfoData, PanError> {
        self.get_data(ApiCategory::UserInfo, USER_INFO_PATH, &[])
            .await
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    /// Request a fresh one-shot download URL for a file
    pub async fn download_url(&self, id: &FileId) -> Result<String, PanError> {
        let data: DownloadInfoData = self
            .get_data(
                ApiCategory::DownloadInfo,
                DOWNLOAD_INFO_PATH,
                &[("fileId", id.to_string())],
            )
            .await?;
        Ok(data.download_url)
    }

    /// Plain GET of a pre-signed URL, optionally ranged
    ///
    /// One-shot URLs carry their own authorization in the query string,
    /// so no bearer header is attached.
    pub async fn fetch_url(
        &self,
        url: &str,
        range: Option<&str>,
    ) -> Result<reqwest::Response, PanError> {
        let mut request = self.http.get(url);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PanError::Http(status));
        }
        Ok(response)
    }
}

// ============================================================================
// Tests
// ============================================================================
