//! Directory entries, object metadata, quota, and account tier
//!
//! These are the value-like handles the store facade hands out. Objects
//! and directories carry their provider id and parentage so mutating
//! operations (move, remove) can run without re-resolving the path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{FileId, Md5Hash, RemotePath};

// ============================================================================
// Object and directory metadata
// ============================================================================

/// Metadata for a stored object (file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Provider-assigned id
    pub id: FileId,
    /// Standard (decoded) remote path
    pub path: RemotePath,
    /// Size in bytes; authoritative after upload completion
    pub size: u64,
    /// Provider-assigned modification time; not settable
    pub mod_time: Option<DateTime<Utc>>,
    /// Lowercase hex MD5 of the content, when the provider reports one
    pub md5: Option<Md5Hash>,
    /// Id of the containing directory
    pub parent_id: FileId,
    /// Whether the object sits in the provider's trash
    pub trashed: bool,
    /// Whether metadata was populated from a listing (vs. synthesised)
    pub fetched: bool,
}

/// Metadata for a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInfo {
    /// Provider-assigned id
    pub id: FileId,
    /// Standard (decoded) remote path
    pub path: RemotePath,
    /// Best-effort modification time; may be absent
    pub mod_time: Option<DateTime<Utc>>,
}

/// A single listing entry: either an object or a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A stored object
    File(ObjectInfo),
    /// A container
    Dir(DirInfo),
}

impl Entry {
    /// The entry's provider id
    #[must_use]
    pub fn id(&self) -> &FileId {
        match self {
            Entry::File(o) => &o.id,
            Entry::Dir(d) => &d.id,
        }
    }

    /// The entry's standard remote path
    #[must_use]
    pub fn path(&self) -> &RemotePath {
        match self {
            Entry::File(o) => &o.path,
            Entry::Dir(d) => &d.path,
        }
    }

    /// The entry's leaf name
    #[must_use]
    pub fn name(&self) -> &str {
        self.path().file_name().unwrap_or("")
    }

    /// Returns true if the entry is a directory
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Dir(_))
    }
}

// ============================================================================
// Quota
// ============================================================================

/// Storage quota as reported by the provider's user-info endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Total storage in bytes
    pub total: u64,
    /// Used storage in bytes
    pub used: u64,
}

impl Quota {
    /// Free bytes, guarded against providers reporting used > total
    #[must_use]
    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }
}

// ============================================================================
// Account tier
// ============================================================================

/// Per-file size ceiling for free accounts (4 GiB)
const FREE_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Per-file size ceiling for premium accounts (128 GiB)
const PREMIUM_MAX_FILE_SIZE: u64 = 128 * 1024 * 1024 * 1024;

/// Account class, which determines QPS ceilings and per-file size limits
///
/// Providers report a `vip` level integer on user info; anything greater
/// than zero is treated as premium. The level is cached in the config and
/// re-detected on the first rate-limit observation after a token refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountTier {
    /// Tier not yet detected (persisted as level -1)
    Unknown,
    /// Free account (level 0)
    Free,
    /// Paying account (level >= 1)
    Premium,
}

impl AccountTier {
    /// Map a persisted/reported level integer onto a tier
    #[must_use]
    pub fn from_level(level: i32) -> Self {
        match level {
            l if l < 0 => AccountTier::Unknown,
            0 => AccountTier::Free,
            _ => AccountTier::Premium,
        }
    }

    /// The level integer persisted to the configuration store
    #[must_use]
    pub fn level(&self) -> i32 {
        match self {
            AccountTier::Unknown => -1,
            AccountTier::Free => 0,
            AccountTier::Premium => 1,
        }
    }

    /// Per-file upload size ceiling for this tier
    ///
    /// Unknown tiers get the free ceiling, the conservative choice.
    #[must_use]
    pub fn max_file_size(&self) -> u64 {
        match self {
            AccountTier::Premium => PREMIUM_MAX_FILE_SIZE,
            AccountTier::Free | AccountTier::Unknown => FREE_MAX_FILE_SIZE,
        }
    }
}

// ============================================================================
// Byte range
// ============================================================================

/// A half-open byte range for ranged downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset (inclusive)
    pub offset: u64,
    /// Number of bytes, or None for "to end of object"
    pub length: Option<u64>,
}

impl ByteRange {
    /// Render as an HTTP `Range` header value
    #[must_use]
    pub fn to_header_value(&self) -> String {
        match self.length {
            Some(len) if len > 0 => {
                format!("bytes={}-{}", self.offset, self.offset + len - 1)
            }
            _ => format!("bytes={}-", self.offset),
        }
    }
}
