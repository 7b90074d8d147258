//! Rate pacing and backoff for the provider API
//!
//! Provides proactive rate limiting to stay under the provider's
//! per-endpoint QPS ceilings, which differ between free and premium
//! account tiers.
//!
//! ## Architecture
//!
//! - [`Pacer`]: enforces a minimum interval between successive calls for
//!   one endpoint category; the interval doubles on retryable failures
//!   (up to a ceiling) and decays back on success
//! - [`PacerTable`]: one pacer per [`ApiCategory`], rebuilt in place when
//!   the detected account tier changes
//! - [`jittered_backoff`]: exponential backoff helper adding 0-25 %
//!   jitter so synchronized clients don't herd
//!
//! ## Usage
//!
//! ```rust,no_run
//! use openpan_client::pacer::{ApiCategory, PacerTable};
//! use openpan_core::domain::entry::AccountTier;
//!
//! # async fn example() {
//! let table = PacerTable::new(AccountTier::Free);
//! table.pacer(ApiCategory::FileList).wait().await;
//! // ... make API call ...
//! table.pacer(ApiCategory::FileList).on_success();
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use openpan_core::domain::entry::AccountTier;
use rand::Rng;
use tracing::debug;

/// Hard ceiling on a pacer's failure-inflated sleep
const MAX_SLEEP: Duration = Duration::from_secs(8);

/// Divisor applied to the current sleep on each success
const DECAY: u32 = 2;

// ============================================================================
// Endpoint categories
// ============================================================================

/// Logical endpoint category for rate limiting
///
/// Each category gets its own independent pacer; the provider documents
/// separate QPS ceilings per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCategory {
    /// Access-token exchange
    AccessToken,
    /// User profile and quota
    UserInfo,
    /// Paginated directory listing
    FileList,
    /// Single-file metadata
    FileDetail,
    /// Directory creation
    Mkdir,
    /// Move to a new parent
    Move,
    /// Leaf rename
    Rename,
    /// Batched soft delete
    Trash,
    /// Batched permanent delete
    Delete,
    /// One-shot download URL issuance
    DownloadInfo,
    /// Upload-create probe
    UploadCreate,
    /// Upload-complete polling
    UploadComplete,
    /// Share-link creation
    Share,
}

impl ApiCategory {
    /// All categories, for table construction
    pub const ALL: &'static [ApiCategory] = &[
        ApiCategory::AccessToken,
        ApiCategory::UserInfo,
        ApiCategory::FileList,
        ApiCategory::FileDetail,
        ApiCategory::Mkdir,
        ApiCategory::Move,
        ApiCategory::Rename,
        ApiCategory::Trash,
        ApiCategory::Delete,
        ApiCategory::DownloadInfo,
        ApiCategory::UploadCreate,
        ApiCategory::UploadComplete,
        ApiCategory::Share,
    ];

    /// Stable name for logging
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCategory::AccessToken => "access_token",
            ApiCategory::UserInfo => "user_info",
            ApiCategory::FileList => "file_list",
            ApiCategory::FileDetail => "file_detail",
            ApiCategory::Mkdir => "mkdir",
            ApiCategory::Move => "move",
            ApiCategory::Rename => "rename",
            ApiCategory::Trash => "trash",
            ApiCategory::Delete => "delete",
            ApiCategory::DownloadInfo => "download_info",
            ApiCategory::UploadCreate => "upload_create",
            ApiCategory::UploadComplete => "upload_complete",
            ApiCategory::Share => "share",
        }
    }
}

/// QPS ceiling for a category at a given account tier
///
/// Endpoints the provider documents as "unlimited" are still capped
/// (at 100 QPS) so accidental storms stay dampened.
#[must_use]
pub fn qps_for(tier: AccountTier, category: ApiCategory) -> u32 {
    use ApiCategory::*;
    match tier {
        AccountTier::Premium => match category {
            AccessToken => 1,
            UserInfo => 2,
            FileList => 10,
            FileDetail => 10,
            Mkdir => 5,
            Move => 5,
            Rename => 5,
            Trash => 5,
            Delete => 5,
            DownloadInfo => 100,
            UploadCreate => 10,
            UploadComplete => 10,
            Share => 2,
        },
        // Unknown tiers pace at the free ceilings, the conservative choice
        AccountTier::Free | AccountTier::Unknown => match category {
            AccessToken => 1,
            UserInfo => 1,
            FileList => 4,
            FileDetail => 4,
            Mkdir => 2,
            Move => 1,
            Rename => 1,
            Trash => 2,
            Delete => 2,
            DownloadInfo => 5,
            UploadCreate => 2,
            UploadComplete => 2,
            Share => 1,
        },
    }
}

// ============================================================================
// Pacer
// ============================================================================

/// Mutable pacer state, protected by a Mutex
#[derive(Debug)]
struct PacerState {
    /// Floor interval between releases (1s / QPS)
    min_sleep: Duration,
    /// Effective interval; grows on failure, decays on success
    current_sleep: Duration,
    /// Earliest instant the next call may be released
    next_release: Instant,
}

/// Serialising rate pacer for one endpoint category
///
/// Callers `wait()` before each request; the pacer guarantees at least
/// `current_sleep` between successive releases. The lock is never held
/// across a sleep: waiters re-check after sleeping, in the style of a
/// try-acquire loop.
#[derive(Debug)]
pub struct Pacer {
    state: Mutex<PacerState>,
}

impl Pacer {
    /// Create a pacer for the given QPS ceiling
    #[must_use]
    pub fn new(qps: u32) -> Self {
        let min_sleep = min_sleep_for(qps);
        Self {
            state: Mutex::new(PacerState {
                min_sleep,
                current_sleep: min_sleep,
                next_release: Instant::now(),
            }),
        }
    }

    /// Wait until this category may issue its next call
    pub async fn wait(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("pacer poisoned");
                let now = Instant::now();
                if now >= state.next_release {
                    state.next_release = now + state.current_sleep;
                    return;
                }
                state.next_release - now
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a retryable failure: double the interval up to the ceiling
    pub fn on_failure(&self) {
        let mut state = self.state.lock().expect("pacer poisoned");
        let doubled = state.current_sleep.saturating_mul(2).min(MAX_SLEEP);
        debug!(
            old_ms = state.current_sleep.as_millis() as u64,
            new_ms = doubled.as_millis() as u64,
            "pacer backoff"
        );
        state.current_sleep = doubled;
    }

    /// Record a success: decay the interval back toward the floor
    pub fn on_success(&self) {
        let mut state = self.state.lock().expect("pacer poisoned");
        state.current_sleep = (state.current_sleep / DECAY).max(state.min_sleep);
    }

    /// Rebind the floor interval to a new QPS ceiling (tier change)
    pub fn set_qps(&self, qps: u32) {
        let mut state = self.state.lock().expect("pacer poisoned");
        state.min_sleep = min_sleep_for(qps);
        state.current_sleep = state.current_sleep.max(state.min_sleep);
    }

    /// Current effective interval (test observability)
    #[must_use]
    pub fn current_sleep(&self) -> Duration {
        self.state.lock().expect("pacer poisoned").current_sleep
    }

    /// Current floor interval (test observability)
    #[must_use]
    pub fn min_sleep(&self) -> Duration {
        self.state.lock().expect("pacer poisoned").min_sleep
    }
}

/// Floor interval for a QPS ceiling: 1 second / QPS
fn min_sleep_for(qps: u32) -> Duration {
    Duration::from_secs(1) / qps.max(1)
}

// ============================================================================
// Jittered backoff helper
// ============================================================================

/// Exponential backoff with 0-25 % jitter
///
/// Returns `base * 2^attempt`, capped at `max`, plus a random 0-25 % of
/// the computed delay so synchronized retriers spread out.
#[must_use]
pub fn jittered_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(16)).min(max);
    let jitter_frac = rand::thread_rng().gen_range(0.0..=0.25);
    exp + exp.mul_f64(jitter_frac)
}

// ============================================================================
// PacerTable
// ============================================================================

/// One pacer per endpoint category, bound to a tier's QPS table
///
/// Shared via `Arc` across the client; `rebind` swaps the floor
/// intervals in place when tier detection observes a change.
#[derive(Debug)]
pub struct PacerTable {
    pacers: HashMap<ApiCategory, Pacer>,
}

impl PacerTable {
    /// Build a table for the given tier
    #[must_use]
    pub fn new(tier: AccountTier) -> Self {
        let pacers = ApiCategory::ALL
            .iter()
            .map(|&cat| (cat, Pacer::new(qps_for(tier, cat))))
            .collect();
        Self { pacers }
    }

    /// The pacer for a category
    ///
    /// # Panics
    /// Never panics in practice: the table is built over `ApiCategory::ALL`.
    #[must_use]
    pub fn pacer(&self, category: ApiCategory) -> &Pacer {
        self.pacers
            .get(&category)
            .expect("pacer table covers all categories")
    }

    /// Rebind every pacer to the QPS ceilings of a new tier
    pub fn rebind(&self, tier: AccountTier) {
        debug!(tier = ?tier, "rebinding pacer table");
        for (&cat, pacer) in &self.pacers {
            pacer.set_qps(qps_for(tier, cat));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
