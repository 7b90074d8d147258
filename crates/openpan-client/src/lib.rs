//! OpenPan Client - 123Pan open-platform storage adapter
//!
//! Provides the async adapter that implements the `openpan-core`
//! `IRemoteStore` port against a 123Pan-style open API:
//! - Bearer-token credential broker with serialized refresh
//! - Per-endpoint pacing with tier-dependent QPS tables
//! - An RPC envelope with a uniform retry classifier
//! - Path → id directory resolution with caching
//! - Paginated listing and batched trash/delete
//! - Chunked, deduplicating ("instant") uploads
//!
//! ## Modules
//!
//! - [`pacer`] - Per-endpoint-category rate pacing and jittered backoff
//! - [`auth`] - Credential broker: token exchange, refresh, persistence
//! - [`client`] - The paced, retrying HTTP/RPC envelope
//! - [`resolver`] - Directory path resolution over the id cache
//! - [`list`] - Listing pagination, recursion, and batch mutations
//! - [`upload`] - The chunked upload engine
//! - [`store`] - `PanStore`, the `IRemoteStore` implementation

pub mod auth;
pub mod client;
pub mod list;
pub mod pacer;
pub mod resolver;
pub mod store;
pub mod upload;

use openpan_core::domain::errors::StoreError;
use thiserror::Error;

/// Errors that can occur when communicating with the provider API
#[derive(Debug, Error)]
pub enum PanError {
    /// A non-retryable API error from the response envelope
    #[error("API error {code}: {message}")]
    Api {
        /// Provider error code
        code: i64,
        /// Provider error message
        message: String,
    },

    /// An HTTP status outside the retry set with no decodable envelope
    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The credential exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// A retryable condition persisted past the retry budget
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Description of the last failure
        last: String,
    },

    /// The ambient cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<PanError> for StoreError {
    fn from(err: PanError) -> Self {
        match err {
            PanError::Api { code, message } => StoreError::Api { code, message },
            PanError::Cancelled => StoreError::Cancelled,
            PanError::Http(status) => StoreError::Transport(format!("HTTP status {status}")),
            PanError::Network(e) => StoreError::Transport(e.to_string()),
            PanError::RetriesExhausted { attempts, last } => {
                StoreError::Transport(format!("retries exhausted after {attempts} attempts: {last}"))
            }
            PanError::TokenExchange(msg) => StoreError::Transport(msg),
            PanError::InvalidResponse(msg) => StoreError::Other(msg),
        }
    }
}
