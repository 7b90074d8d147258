//! Configuration for a remote instance
//!
//! Provides the typed configuration struct that maps to the YAML remote
//! configuration file, with loading, validation, and defaults, plus the
//! file-backed [`IConfigStore`](crate::ports::config_store::IConfigStore)
//! implementation used to persist refreshed credentials.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;
use crate::encoding::EncodingFlags;
use crate::ports::config_store::{IConfigStore, PersistedState};

/// Lower bound for `upload_concurrency`
pub const MIN_UPLOAD_CONCURRENCY: usize = 1;

/// Upper bound for `upload_concurrency`
pub const MAX_UPLOAD_CONCURRENCY: usize = 32;

fn default_upload_concurrency() -> usize {
    3
}

fn default_tier_level() -> i32 {
    -1
}

// ---------------------------------------------------------------------------
// RemoteConfig
// ---------------------------------------------------------------------------

/// Configuration for one remote (one filesystem instance)
///
/// Secrets arrive here already revealed; obfuscation and prompting are the
/// caller's concern. `access_token`, `token_expiry`, and `tier_level` are
/// also *outputs*: the credential broker writes refreshed values back
/// through the config store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Application client id issued by the provider's open platform
    pub client_id: String,
    /// Application client secret
    pub client_secret: String,
    /// Cached bearer token from a previous run, if any
    #[serde(default)]
    pub access_token: Option<String>,
    /// Absolute expiry of the cached token
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
    /// Concurrent slice uploads per file (1-32)
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    /// Most recently observed account tier level; -1 when unknown
    #[serde(default = "default_tier_level")]
    pub tier_level: i32,
    /// Name-encoding positional flags
    #[serde(default)]
    pub encoding: EncodingFlags,
    /// Override for the API base URL (used by tests)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Root path within the remote; empty means the true root
    #[serde(default)]
    pub root_path: Option<String>,
}

impl RemoteConfig {
    /// Create a config with the mandatory credentials and defaults elsewhere
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            access_token: None,
            token_expiry: None,
            upload_concurrency: default_upload_concurrency(),
            tier_level: default_tier_level(),
            encoding: EncodingFlags::default(),
            base_url: None,
            root_path: None,
        }
    }

    /// Validate field constraints
    ///
    /// # Errors
    /// Returns `DomainError::InvalidConfig` on the first violated constraint
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.client_id.is_empty() {
            return Err(DomainError::InvalidConfig(
                "client_id must not be empty".to_string(),
            ));
        }
        if self.client_secret.is_empty() {
            return Err(DomainError::InvalidConfig(
                "client_secret must not be empty".to_string(),
            ));
        }
        if !(MIN_UPLOAD_CONCURRENCY..=MAX_UPLOAD_CONCURRENCY).contains(&self.upload_concurrency) {
            return Err(DomainError::InvalidConfig(format!(
                "upload_concurrency must be between {MIN_UPLOAD_CONCURRENCY} and {MAX_UPLOAD_CONCURRENCY}, got {}",
                self.upload_concurrency
            )));
        }
        Ok(())
    }

    /// Load configuration from a YAML file at `path`
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RemoteConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Write configuration as YAML to `path`
    ///
    /// The file is written to a sibling temp file first and renamed into
    /// place, so a concurrent reader sees either the old or the new
    /// contents, never a torn pair of token and expiry.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// YamlConfigStore
// ---------------------------------------------------------------------------

/// File-backed config store persisting refreshed state into the YAML file
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    /// Create a store over the YAML file at `path`
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl IConfigStore for YamlConfigStore {
    fn load(&self) -> anyhow::Result<RemoteConfig> {
        RemoteConfig::load(&self.path)
    }

    fn save_state(&self, state: &PersistedState) -> anyhow::Result<()> {
        let mut config = RemoteConfig::load(&self.path).unwrap_or_default();
        config.access_token = Some(state.access_token.clone());
        config.token_expiry = Some(state.token_expiry);
        config.tier_level = state.tier_level;
        config.save(&self.path)
    }
}

// ---------------------------------------------------------------------------
// MemoryConfigStore
// ---------------------------------------------------------------------------

/// In-memory config store for tests and ephemeral remotes
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: std::sync::Mutex<MemoryConfigInner>,
}

#[derive(Debug, Default)]
struct MemoryConfigInner {
    config: RemoteConfig,
    saves: u32,
}

impl MemoryConfigStore {
    /// Create a store seeded with the given config
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            inner: std::sync::Mutex::new(MemoryConfigInner { config, saves: 0 }),
        }
    }

    /// How many times state was persisted (test observability)
    #[must_use]
    pub fn save_count(&self) -> u32 {
        self.inner.lock().expect("config store poisoned").saves
    }
}

impl IConfigStore for MemoryConfigStore {
    fn load(&self) -> anyhow::Result<RemoteConfig> {
        Ok(self.inner.lock().expect("config store poisoned").config.clone())
    }

    fn save_state(&self, state: &PersistedState) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("config store poisoned");
        inner.config.access_token = Some(state.access_token.clone());
        inner.config.token_expiry = Some(state.token_expiry);
        inner.config.tier_level = state.tier_level;
        inner.saves += 1;
        Ok(())
    }
}
