//! Directory path resolution over the id cache
//!
//! Maps human paths onto provider-native directory ids by walking the
//! path component-by-component from the cached root. Each component is
//! resolved from the cache when possible, otherwise by listing the
//! parent and matching the encoded name. With `create` set, missing
//! components are created through the mkdir endpoint and installed in
//! the cache.
//!
//! Cache invariants: an entry is only installed once the provider has
//! confirmed the directory exists, and any operation that moves or
//! deletes a directory flushes the affected subtree before reporting
//! success.

use std::sync::Arc;

use openpan_core::domain::dircache::DirCache;
use openpan_core::domain::errors::StoreError;
use openpan_core::domain::newtypes::{FileId, RemotePath};
use openpan_core::encoding::NameEncoder;
use tracing::debug;

use crate::client::PanClient;
use crate::list::{self, FileEntry};
use crate::PanError;

/// What the configured root path turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootKind {
    /// The root resolves to a directory with this id
    Dir(FileId),
    /// The root's last component is actually a file; callers switch to
    /// single-file semantics
    File {
        /// Id of the directory containing the file
        parent_id: FileId,
        /// The file's standard (decoded) leaf name
        leaf: String,
    },
}

/// Resolves standard paths to provider directory ids, with caching
pub struct DirResolver {
    client: Arc<PanClient>,
    cache: DirCache,
    encoder: NameEncoder,
}

impl DirResolver {
    /// Create a resolver rooted at the conventional root id
    pub fn new(client: Arc<PanClient>, encoder: NameEncoder) -> Self {
        Self {
            client,
            cache: DirCache::new(FileId::root()),
            encoder,
        }
    }

    /// The underlying cache (install/flush surface)
    #[must_use]
    pub fn cache(&self) -> &DirCache {
        &self.cache
    }

    /// The name encoder shared with the store
    #[must_use]
    pub fn encoder(&self) -> &NameEncoder {
        &self.encoder
    }

    /// Locate a child entry by its standard leaf name
    ///
    /// Lists the parent directory and matches against the encoded name.
    /// Trashed entries never match.
    pub async fn find_leaf(
        &self,
        parent_id: &FileId,
        leaf: &str,
    ) -> Result<Option<FileEntry>, PanError> {
        let encoded = self.encoder.encode(leaf);
        let entries = list::list_all(&self.client, parent_id).await?;
        Ok(entries
            .into_iter()
            .find(|e| !e.is_trashed() && e.filename == encoded))
    }

    /// Resolve a directory path to its id, optionally creating it
    ///
    /// # Errors
    /// `DirNotFound` when a component is missing (and `create` is off)
    /// or when a component resolves to a file.
    pub async fn find_dir(
        &self,
        path: &RemotePath,
        create: bool,
    ) -> Result<FileId, StoreError> {
        let mut current = self.cache.root_id().clone();
        let mut walked = RemotePath::root();

        for component in path.components() {
            walked = walked.join(component)?;

            if let Some(cached) = self.cache.get(&walked) {
                current = cached;
                continue;
            }

            match self.find_leaf(&current, component).await? {
                Some(entry) if entry.is_dir() => {
                    self.cache.put(walked.clone(), entry.file_id.clone());
                    current = entry.file_id;
                }
                Some(_) => {
                    return Err(StoreError::DirNotFound(format!(
                        "{walked} is a file, not a directory"
                    )));
                }
                None if create => {
                    let encoded = self.encoder.encode(component);
                    let id = list::mkdir(&self.client, &current, &encoded).await?;
                    debug!(path = %walked, id = %id, "created missing directory");
                    self.cache.put(walked.clone(), id.clone());
                    current = id;
                }
                None => return Err(StoreError::DirNotFound(walked.to_string())),
            }
        }

        Ok(current)
    }

    /// Split a path into (leaf, parent id) without requiring the leaf
    ///
    /// Used by upload and move to target a parent directory; the leaf
    /// itself may or may not exist yet.
    pub async fn find_path(
        &self,
        path: &RemotePath,
        create_parents: bool,
    ) -> Result<(String, FileId), StoreError> {
        let Some(leaf) = path.file_name() else {
            return Err(StoreError::IsDirectory(path.to_string()));
        };
        let parent = path.parent().unwrap_or_else(RemotePath::root);
        let parent_id = self.find_dir(&parent, create_parents).await?;
        Ok((leaf.to_string(), parent_id))
    }

    /// Resolve the configured root path at start-up
    ///
    /// If the path does not resolve as a directory, the last component
    /// is probed as a file name under its parent; a hit returns the
    /// file sentinel so callers can flip to single-file semantics.
    pub async fn resolve_root(&self, path: &RemotePath) -> Result<RootKind, StoreError> {
        match self.find_dir(path, false).await {
            Ok(id) => Ok(RootKind::Dir(id)),
            Err(err @ StoreError::DirNotFound(_)) => {
                let Some(leaf) = path.file_name() else {
                    return Err(err);
                };
                let parent = path.parent().unwrap_or_else(RemotePath::root);
                let parent_id = self.find_dir(&parent, false).await?;
                match self.find_leaf(&parent_id, leaf).await? {
                    Some(entry) if !entry.is_dir() => Ok(RootKind::File {
                        parent_id,
                        leaf: leaf.to_string(),
                    }),
                    _ => Err(err),
                }
            }
            Err(other) => Err(other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
