//! Directory path → provider id cache
//!
//! Maps standard remote paths to opaque provider directory ids. The root
//! id is fixed for the lifetime of the cache; all other entries are
//! installed only once the provider has confirmed their existence, and
//! are evicted explicitly when a mutation invalidates the subtree.
//! There is no TTL.

use dashmap::DashMap;

use super::newtypes::{FileId, RemotePath};

/// Concurrent cache of resolved directory ids
///
/// Many readers walk the cache concurrently while resolvers install and
/// flush entries, so the map is a `DashMap` rather than a mutexed
/// `HashMap`. Keys are standard (decoded) paths; values are normalised
/// string ids.
#[derive(Debug)]
pub struct DirCache {
    /// Immutable id of the cache root
    root_id: FileId,
    /// path → id for every confirmed directory below the root
    entries: DashMap<RemotePath, FileId>,
}

impl DirCache {
    /// Create a cache rooted at the given provider id
    #[must_use]
    pub fn new(root_id: FileId) -> Self {
        Self {
            root_id,
            entries: DashMap::new(),
        }
    }

    /// The immutable root id
    #[must_use]
    pub fn root_id(&self) -> &FileId {
        &self.root_id
    }

    /// Look up the id cached for a path
    ///
    /// The root path always resolves to the root id.
    #[must_use]
    pub fn get(&self, path: &RemotePath) -> Option<FileId> {
        if path.is_root() {
            return Some(self.root_id.clone());
        }
        self.entries.get(path).map(|e| e.value().clone())
    }

    /// Install a confirmed directory id
    ///
    /// Installing the root path is a no-op; the root id is fixed.
    pub fn put(&self, path: RemotePath, id: FileId) {
        if path.is_root() {
            return;
        }
        self.entries.insert(path, id);
    }

    /// Evict a path and its entire subtree
    ///
    /// Called by any mutation that invalidates cached parentage (move,
    /// rename, rmdir, purge). Flushing the root clears everything but
    /// keeps the root id.
    pub fn flush(&self, path: &RemotePath) {
        if path.is_root() {
            self.flush_all();
            return;
        }
        self.entries.retain(|key, _| !path.contains(key));
    }

    /// Drop every cached entry, keeping the root id
    pub fn flush_all(&self) {
        self.entries.clear();
    }

    /// Number of cached entries (excluding the implicit root)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
