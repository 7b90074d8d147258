//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for remote paths, provider file ids, and content
//! hashes. Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::errors::DomainError;

// ============================================================================
// Path type
// ============================================================================

/// A standard remote path (must start with /)
///
/// Paths are `/`-separated sequences of name components, case-sensitive,
/// with `/` denoting the root of the configured remote. Names are stored
/// in *standard* (decoded) form; the provider-restricted encoding is
/// applied only at the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Create a new RemotePath
    ///
    /// # Errors
    /// Returns error if the path doesn't start with `/`, contains empty
    /// components, traversal sequences, or a trailing slash
    pub fn new(path: String) -> Result<Self, DomainError> {
        if !path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Remote path must start with '/': {path}"
            )));
        }

        if path.len() > 1 && path.contains("//") {
            return Err(DomainError::InvalidPath(format!(
                "Remote path contains empty components: {path}"
            )));
        }

        if path.len() > 1 && path.ends_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Remote path has a trailing slash: {path}"
            )));
        }

        if path.split('/').any(|c| c == "." || c == "..") {
            return Err(DomainError::InvalidPath(format!(
                "Remote path contains traversal components: {path}"
            )));
        }

        Ok(Self(path))
    }

    /// Create the root path "/"
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Returns true if this is the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the name components, root first
    ///
    /// The root path yields no components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Join a single path component
    ///
    /// # Errors
    /// Returns error if the component is empty or contains `/` or traversal
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty()
            || component.contains('/')
            || component == "."
            || component == ".."
        {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path component: {component}"
            )));
        }

        let new_path = if self.0 == "/" {
            format!("/{component}")
        } else {
            format!("{}/{component}", self.0)
        };

        Self::new(new_path)
    }

    /// Get the parent path, or None for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Get the leaf name component, or None for the root
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.0 == "/" {
            return None;
        }

        self.0.rsplit('/').next()
    }

    /// Returns true if `other` is this path or lies underneath it
    #[must_use]
    pub fn contains(&self, other: &RemotePath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }
}

impl Display for RemotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemotePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemotePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

// ============================================================================
// Provider file id
// ============================================================================

/// Opaque provider file/directory id, normalised to a string
///
/// Providers render ids as JSON integers or strings depending on endpoint;
/// this type accepts both on deserialization and always renders as a
/// string, so the directory cache and resolver only ever see one form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId(String);

impl FileId {
    /// The conventional root directory id
    pub const ROOT: &'static str = "0";

    /// Create a new FileId
    ///
    /// # Errors
    /// Returns error if the id is empty or contains whitespace
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidFileId(
                "File ID cannot be empty".to_string(),
            ));
        }

        if id.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidFileId(format!(
                "File ID contains whitespace: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// The root directory id ("0")
    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Returns true if this is the root id
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for FileId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for FileId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl serde::de::Visitor<'_> for IdVisitor {
            type Value = FileId;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("a file id as a string or integer")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<FileId, E> {
                FileId::new(v.to_string()).map_err(E::custom)
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<FileId, E> {
                Ok(FileId::from(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<FileId, E> {
                Ok(FileId::from(v))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

// ============================================================================
// Content hash
// ============================================================================

/// Lowercase hex MD5 content hash
///
/// The provider expects lowercase hex in upload-create probes; some
/// endpoints return uppercase, which is normalised here on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Md5Hash(String);

impl Md5Hash {
    /// Hex length of an MD5 digest
    const HEX_LEN: usize = 32;

    /// Create a new Md5Hash, normalising to lowercase
    ///
    /// # Errors
    /// Returns error if the string is not exactly 32 hex characters
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.len() != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                hash.len()
            )));
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "non-hex characters in hash: {hash}"
            )));
        }

        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Create an Md5Hash from a raw 16-byte digest
    #[must_use]
    pub fn from_digest(digest: [u8; 16]) -> Self {
        let mut hex = String::with_capacity(Self::HEX_LEN);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// Get the inner lowercase hex string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Md5Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Md5Hash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for Md5Hash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Md5Hash> for String {
    fn from(hash: Md5Hash) -> Self {
        hash.0
    }
}

// ============================================================================
// Tests
// ============================================================================
