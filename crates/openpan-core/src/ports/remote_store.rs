//! Remote store port (driven/secondary port)
//!
//! This module defines the uniform filesystem-like contract every
//! provider adapter implements. The primary implementation targets the
//! 123Pan open-platform API (`openpan-client`), but the trait is
//! provider-agnostic: paths are standard decoded paths, ids are opaque,
//! and errors are the typed [`StoreError`] variants a sync engine can
//! branch on.
//!
//! ## Design Notes
//!
//! - Objects and directories are value-like handles; they carry enough
//!   provider state (id, parent id) for mutations without re-resolution.
//! - Modification times are provider-assigned. `set_mod_time` exists on
//!   the trait but backends that cannot honour it return
//!   `StoreError::Unsupported("mod-time")`.
//! - Uses `#[async_trait]` for async trait methods.

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::domain::entry::{ByteRange, Entry, ObjectInfo, Quota};
use crate::domain::errors::StoreError;
use crate::domain::newtypes::{Md5Hash, RemotePath};

/// Boxed async byte stream returned by `open`
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Combined bound for upload sources that can be rewound after hashing
pub trait SeekableReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> SeekableReader for T {}

/// Byte source accepted by `put`
///
/// Uploads hash the content before any byte reaches the wire, so the
/// source must be replayable. A `Seekable` source is hashed in place
/// and rewound; a one-shot `Stream` is buffered or spooled by the
/// upload engine depending on size.
pub enum SourceReader {
    /// One-shot stream with no random access
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// Rewindable source supporting seek
    Seekable(Box<dyn SeekableReader>),
}

impl AsyncRead for SourceReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SourceReader::Stream(reader) => Pin::new(reader).poll_read(cx, buf),
            SourceReader::Seekable(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

/// Hash algorithms a caller can request from [`IRemoteStore::hash_of`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// MD5, the only hash this family of providers reports
    Md5,
    /// SHA-1 (unsupported here; present for contract completeness)
    Sha1,
}

/// Input to [`IRemoteStore::put`]
///
/// The reader supplies the content; `size` must be the exact number of
/// bytes the reader will yield (a mismatch is a fatal contract
/// violation). `size == None` is refused: the upload-create probe needs
/// the size up front.
pub struct PutSource {
    /// Content byte source
    pub reader: SourceReader,
    /// Declared size in bytes; None means unknown and is refused
    pub size: Option<u64>,
    /// Advisory modification time; providers here ignore it
    pub mod_time: Option<DateTime<Utc>>,
}

impl PutSource {
    /// Convenience constructor for a known-size one-shot stream
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static, size: u64) -> Self {
        Self {
            reader: SourceReader::Stream(Box::new(reader)),
            size: Some(size),
            mod_time: None,
        }
    }

    /// Convenience constructor for a known-size rewindable source
    ///
    /// Seekable sources avoid the temporary spool above the upload
    /// engine's in-memory threshold: the engine hashes in place and
    /// seeks back to the start before transferring.
    pub fn seekable(
        reader: impl AsyncRead + AsyncSeek + Send + Unpin + 'static,
        size: u64,
    ) -> Self {
        Self {
            reader: SourceReader::Seekable(Box::new(reader)),
            size: Some(size),
            mod_time: None,
        }
    }
}

/// Port trait for the uniform object/filesystem contract
///
/// See the operation table in the crate documentation for the error
/// contract of each method. Transient failures (throttling, 5xx, token
/// expiry) are recovered inside implementations and never surface here.
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// List the visible (non-trashed) entries directly under `dir`
    ///
    /// Child directories discovered here are installed in the resolver
    /// cache as a side effect.
    async fn list(&self, dir: &RemotePath) -> Result<Vec<Entry>, StoreError>;

    /// Resolve a file path into an object handle with populated metadata
    ///
    /// # Errors
    /// `NotFound` if no entry exists; `IsDirectory` if the path names a
    /// directory.
    async fn stat(&self, path: &RemotePath) -> Result<ObjectInfo, StoreError>;

    /// Upload an object, creating missing parent directories
    ///
    /// Existing objects at the same path are replaced (overwrite
    /// duplicate policy). Zero-byte and unknown-size sources are refused.
    async fn put(&self, source: PutSource, dest: &RemotePath) -> Result<ObjectInfo, StoreError>;

    /// Open an object for reading, optionally restricted to a byte range
    ///
    /// Requests a fresh one-shot download URL from the provider, then
    /// streams the plain GET response.
    async fn open(
        &self,
        object: &ObjectInfo,
        range: Option<ByteRange>,
    ) -> Result<ObjectReader, StoreError>;

    /// Ensure a directory exists (idempotent)
    async fn mkdir(&self, dir: &RemotePath) -> Result<(), StoreError>;

    /// Remove an empty directory
    ///
    /// # Errors
    /// `DirNotEmpty` if any non-trashed child is visible; `DirNotFound`
    /// if the directory does not exist.
    async fn rmdir(&self, dir: &RemotePath) -> Result<(), StoreError>;

    /// Server-side move/rename of an object to a new path
    ///
    /// Returns the destination handle; the source handle is invalid
    /// afterwards. Identity (id, size, hash) is preserved.
    async fn move_object(
        &self,
        src: &ObjectInfo,
        dest: &RemotePath,
    ) -> Result<ObjectInfo, StoreError>;

    /// Server-side copy via content deduplication
    ///
    /// # Errors
    /// `CantCopy` when the server does not already hold the bytes; the
    /// caller falls back to a stream copy through `put`.
    async fn copy_object(
        &self,
        src: &ObjectInfo,
        dest: &RemotePath,
    ) -> Result<ObjectInfo, StoreError>;

    /// Server-side directory move with optional rename
    async fn dir_move(
        &self,
        src_dir: &RemotePath,
        dest_dir: &RemotePath,
    ) -> Result<(), StoreError>;

    /// Move an object to the provider trash
    async fn remove(&self, object: &ObjectInfo) -> Result<(), StoreError>;

    /// Recursively trash a directory and everything below it
    async fn purge(&self, dir: &RemotePath) -> Result<(), StoreError>;

    /// Permanently delete everything currently in the trash
    async fn clean_up(&self) -> Result<(), StoreError>;

    /// Storage quota for the account
    async fn about(&self) -> Result<Quota, StoreError>;

    /// Create a public share link for `path`
    ///
    /// `expiry_days` is snapped to the provider-supported values; zero
    /// means forever. `unlink` is unsupported and returns
    /// `Unsupported("unlink")`.
    async fn public_link(
        &self,
        path: &RemotePath,
        expiry_days: u32,
        unlink: bool,
    ) -> Result<String, StoreError>;

    /// Set an object's modification time
    ///
    /// Providers in this family reject mtime writes; the default
    /// implementation returns the fixed sentinel.
    async fn set_mod_time(
        &self,
        _object: &ObjectInfo,
        _mod_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("mod-time"))
    }

    /// Return the requested hash of an object, if the backend tracks it
    ///
    /// Only [`HashKind::Md5`] is supported; other kinds return the fixed
    /// `Unsupported("hash-kind")` sentinel.
    fn hash_of(
        &self,
        object: &ObjectInfo,
        kind: HashKind,
    ) -> Result<Option<Md5Hash>, StoreError> {
        match kind {
            HashKind::Md5 => Ok(object.md5.clone()),
            _ => Err(StoreError::Unsupported("hash-kind")),
        }
    }
}
