//! Configuration store port (driven/secondary port)
//!
//! The credential broker persists refreshed tokens and the observed tier
//! level through this interface so that a subsequent process starts from
//! the refreshed state. Implementations must make the write atomic with
//! respect to concurrent readers: a reader sees either the old or the
//! new (token, expiry) pair, never a mixture.

use chrono::{DateTime, Utc};

use crate::config::RemoteConfig;

/// State written back to the configuration store after a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState {
    /// Freshly obtained bearer token
    pub access_token: String,
    /// Absolute expiry of that token
    pub token_expiry: DateTime<Utc>,
    /// Most recently observed account tier level
    pub tier_level: i32,
}

/// Port trait for loading and persisting remote configuration
pub trait IConfigStore: Send + Sync {
    /// Load the remote configuration
    fn load(&self) -> anyhow::Result<RemoteConfig>;

    /// Persist refreshed token state, leaving other fields untouched
    fn save_state(&self, state: &PersistedState) -> anyhow::Result<()>;
}
