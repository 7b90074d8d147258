//! Domain and store error types
//!
//! `DomainError` covers validation failures at construction time.
//! `StoreError` is the typed error surface of the `IRemoteStore` port:
//! every filesystem-like operation reports one of these variants so that
//! callers can distinguish not-found from conflict from transient failure
//! without string matching.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid remote path format or content
    #[error("Invalid remote path: {0}")]
    InvalidPath(String),

    /// Invalid file ID format
    #[error("Invalid file ID: {0}")]
    InvalidFileId(String),

    /// Invalid hash format (expected 32 lowercase hex characters)
    #[error("Invalid MD5 hash: {0}")]
    InvalidHash(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Configuration value out of range or missing
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors reported by `IRemoteStore` operations
///
/// The variants follow the classification a sync engine needs:
/// not-found and conflict variants are terminal for the operation,
/// `Api` carries the provider's code and message for diagnosis, and
/// `Cancelled` is returned when the ambient cancellation fired mid-call.
/// Transient failures (429/5xx, token expiry) are recovered inside the
/// adapter and never surface here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist at the given path
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The path names a directory where an object was expected
    #[error("Path is a directory: {0}")]
    IsDirectory(String),

    /// The directory does not exist
    #[error("Directory not found: {0}")]
    DirNotFound(String),

    /// The directory cannot be removed because it still has visible children
    #[error("Directory not empty: {0}")]
    DirNotEmpty(String),

    /// The destination directory already exists
    #[error("Directory already exists: {0}")]
    DirExists(String),

    /// The provider refuses zero-byte uploads
    #[error("Cannot upload zero-length file: {0}")]
    CantUploadEmpty(String),

    /// Upload was requested without a declared size
    #[error("Cannot upload file of unknown size: {0}")]
    UnknownSize(String),

    /// Server-side move is not possible for this source/destination pair
    #[error("Cannot move: {0}")]
    CantMove(String),

    /// Server-side copy could not be satisfied by deduplication
    #[error("Cannot server-side copy: {0}")]
    CantCopy(String),

    /// Server-side directory move is not possible
    #[error("Cannot move directory: {0}")]
    CantDirMove(String),

    /// The operation is permanently unsupported by this backend
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// The ambient cancellation token fired before the operation completed
    #[error("Operation cancelled")]
    Cancelled,

    /// A non-retryable provider API error, carrying the original envelope
    #[error("API error {code}: {message}")]
    Api {
        /// Provider error code from the response envelope
        code: i64,
        /// Provider error message from the response envelope
        message: String,
    },

    /// Declared size does not match the number of bytes actually hashed
    #[error("Size mismatch: declared {declared} bytes but hashed {hashed}")]
    SizeMismatch {
        /// Size the caller declared up front
        declared: u64,
        /// Bytes observed while hashing the stream
        hashed: u64,
    },

    /// The provider's final hash disagrees with the locally computed one
    #[error("Hash mismatch after upload: expected {expected}, provider reported {actual}")]
    HashMismatch {
        /// Locally computed lowercase hex MD5
        expected: String,
        /// Hash reported by the provider
        actual: String,
    },

    /// The file exceeds the per-file size ceiling for the account tier
    #[error("File of {size} bytes exceeds the {limit} byte limit for this account tier")]
    FileTooLarge {
        /// Size of the file being uploaded
        size: u64,
        /// Per-file ceiling of the current tier
        limit: u64,
    },

    /// Upload-complete polling exceeded its ceiling without a file id
    #[error("Upload did not complete within {0} seconds")]
    UploadTimeout(u64),

    /// Transport-level failure that exhausted its retry budget
    #[error("Transport error: {0}")]
    Transport(String),

    /// Local I/O failure (spool file, stream read)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Domain validation failure crossing the port boundary
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Returns true if this error is one of the not-found variants
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::DirNotFound(_))
    }
}
