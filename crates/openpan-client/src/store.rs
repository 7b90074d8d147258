//! PanStore - the `IRemoteStore` implementation
//!
//! Ties the credential broker, pacer table, directory resolver, listing
//! engine, and upload engine together behind the uniform filesystem
//! contract defined in `openpan-core`. One `PanStore` corresponds to one
//! configured remote; it exclusively owns the directory cache and the
//! RPC client.
//!
//! ## Design Notes
//!
//! - Objects back-reference nothing: handles carry (id, parent id) and
//!   the store is passed in for every operation, avoiding ownership
//!   cycles between filesystem and object.
//! - Mutating operations flush the affected cache subtree before
//!   returning success.
//! - `shutdown()` fires the store-level cancellation token; in-flight
//!   uploads abort their pending preuploads best-effort.

use std::sync::Arc;

use futures_util::TryStreamExt;
use openpan_core::config::RemoteConfig;
use openpan_core::domain::entry::{ByteRange, DirInfo, Entry, ObjectInfo, Quota};
use openpan_core::domain::errors::StoreError;
use openpan_core::domain::newtypes::RemotePath;
use openpan_core::encoding::NameEncoder;
use openpan_core::ports::config_store::IConfigStore;
use openpan_core::ports::remote_store::{IRemoteStore, ObjectReader, PutSource};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{numeric_id, PanClient};
use crate::list::{self, FileEntry};
use crate::pacer::ApiCategory;
use crate::resolver::{DirResolver, RootKind};
use crate::upload;

/// Share-creation endpoint path
const SHARE_PATH: &str = "/api/v1/share/create";

/// Public prefix share keys are appended to
const SHARE_URL_PREFIX: &str = "https://www.123pan.com/s/";

/// Expiry day counts the share endpoint accepts; zero means forever
const SHARE_EXPIRY_STEPS: &[u32] = &[1, 7, 30];

/// Payload of the share-create endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareData {
    /// Key appended to the public share URL
    share_key: String,
}

/// Snap a requested expiry to the nearest supported value
///
/// Zero and anything beyond the largest step mean "forever".
fn snap_share_expiry(days: u32) -> u32 {
    if days == 0 {
        return 0;
    }
    for &step in SHARE_EXPIRY_STEPS {
        if days <= step {
            return step;
        }
    }
    0
}

// ============================================================================
// PanStore
// ============================================================================

/// The provider-backed remote store
pub struct PanStore {
    client: Arc<PanClient>,
    resolver: DirResolver,
    upload_concurrency: usize,
    root_path: Option<RemotePath>,
    shutdown: CancellationToken,
}

impl PanStore {
    /// Build a store from a validated remote configuration
    pub fn new(
        config: RemoteConfig,
        config_store: Arc<dyn IConfigStore>,
    ) -> Result<Self, StoreError> {
        config.validate()?;

        let encoder = NameEncoder::new(config.encoding);
        let client = Arc::new(PanClient::new(&config, config_store));
        let resolver = DirResolver::new(client.clone(), encoder);
        let root_path = config
            .root_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| RemotePath::new(p.to_string()))
            .transpose()?;

        Ok(Self {
            client,
            resolver,
            upload_concurrency: config.upload_concurrency,
            root_path,
            shutdown: CancellationToken::new(),
        })
    }

    /// The underlying client (for callers composing lower-level calls)
    #[must_use]
    pub fn client(&self) -> &Arc<PanClient> {
        &self.client
    }

    /// The directory resolver and its cache
    #[must_use]
    pub fn resolver(&self) -> &DirResolver {
        &self.resolver
    }

    /// Cancel every in-flight and future operation on this store
    pub fn shutdown(&self) {
        info!("store shutdown requested");
        self.shutdown.cancel();
    }

    /// Resolve the configured root path
    ///
    /// Returns the file sentinel when the root's last component names a
    /// file, so the caller can switch to single-file semantics.
    pub async fn probe_root(&self) -> Result<RootKind, StoreError> {
        match &self.root_path {
            None => Ok(RootKind::Dir(self.resolver.cache().root_id().clone())),
            Some(path) => self.resolver.resolve_root(path).await,
        }
    }

    /// Map a wire entry into a port-level entry under `parent_path`
    fn entry_from_wire(
        &self,
        parent_path: &RemotePath,
        entry: FileEntry,
    ) -> Result<Entry, StoreError> {
        let name = self.resolver.encoder().decode(&entry.filename);
        let path = parent_path.join(&name)?;

        Ok(if entry.is_dir() {
            let mod_time = entry.mod_time();
            Entry::Dir(DirInfo {
                id: entry.file_id,
                path,
                mod_time,
            })
        } else {
            Entry::File(ObjectInfo {
                id: entry.file_id.clone(),
                path,
                size: entry.size,
                mod_time: entry.mod_time(),
                md5: entry.md5(),
                parent_id: entry.parent_file_id.clone(),
                trashed: entry.is_trashed(),
                fetched: true,
            })
        })
    }
}

// ============================================================================
// IRemoteStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IRemoteStore for PanStore {
    async fn list(&self, dir: &RemotePath) -> Result<Vec<Entry>, StoreError> {
        self.client.maybe_recheck_tier().await;
        let dir_id = self.resolver.find_dir(dir, false).await?;

        let wire = list::list_all(&self.client, &dir_id).await?;
        let mut entries = Vec::with_capacity(wire.len());
        for entry in wire {
            if entry.is_trashed() {
                continue;
            }
            let entry = self.entry_from_wire(dir, entry)?;
            if let Entry::Dir(info) = &entry {
                self.resolver.cache().put(info.path.clone(), info.id.clone());
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn stat(&self, path: &RemotePath) -> Result<ObjectInfo, StoreError> {
        if path.is_root() {
            return Err(StoreError::IsDirectory(path.to_string()));
        }
        // A missing parent means the object cannot exist either
        let (leaf, parent_id) = match self.resolver.find_path(path, false).await {
            Ok(found) => found,
            Err(StoreError::DirNotFound(_)) => {
                return Err(StoreError::NotFound(path.to_string()))
            }
            Err(other) => return Err(other),
        };

        match self.resolver.find_leaf(&parent_id, &leaf).await? {
            Some(entry) if entry.is_dir() => Err(StoreError::IsDirectory(path.to_string())),
            Some(entry) => {
                let parent = path.parent().unwrap_or_else(RemotePath::root);
                match self.entry_from_wire(&parent, entry)? {
                    Entry::File(info) => Ok(info),
                    Entry::Dir(_) => Err(StoreError::IsDirectory(path.to_string())),
                }
            }
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }

    async fn put(&self, source: PutSource, dest: &RemotePath) -> Result<ObjectInfo, StoreError> {
        self.client.maybe_recheck_tier().await;

        let Some(size) = source.size else {
            return Err(StoreError::UnknownSize(dest.to_string()));
        };
        if size == 0 {
            return Err(StoreError::CantUploadEmpty(dest.to_string()));
        }
        let limit = self.client.current_tier().max_file_size();
        if size > limit {
            return Err(StoreError::FileTooLarge { size, limit });
        }

        let (leaf, parent_id) = self.resolver.find_path(dest, true).await?;
        let encoded = self.resolver.encoder().encode(&leaf);
        let cancel = self.shutdown.child_token();

        upload::upload(
            &self.client,
            &parent_id,
            &encoded,
            dest,
            source,
            self.upload_concurrency,
            &cancel,
        )
        .await
    }

    async fn open(
        &self,
        object: &ObjectInfo,
        range: Option<ByteRange>,
    ) -> Result<ObjectReader, StoreError> {
        let url = self.client.download_url(&object.id).await?;
        let header = range.map(|r| r.to_header_value());
        let response = self.client.fetch_url(&url, header.as_deref()).await?;

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(tokio_util::io::StreamReader::new(stream)))
    }

    async fn mkdir(&self, dir: &RemotePath) -> Result<(), StoreError> {
        self.resolver.find_dir(dir, true).await.map(|_| ())
    }

    async fn rmdir(&self, dir: &RemotePath) -> Result<(), StoreError> {
        if dir.is_root() {
            return Err(StoreError::Other(
                "refusing to remove the remote root".to_string(),
            ));
        }
        let dir_id = self.resolver.find_dir(dir, false).await?;

        if !list::confirm_empty(&self.client, &dir_id).await? {
            return Err(StoreError::DirNotEmpty(dir.to_string()));
        }

        list::trash_batch(&self.client, &[dir_id]).await?;
        self.resolver.cache().flush(dir);
        debug!(dir = %dir, "directory trashed");
        Ok(())
    }

    async fn move_object(
        &self,
        src: &ObjectInfo,
        dest: &RemotePath,
    ) -> Result<ObjectInfo, StoreError> {
        self.client.maybe_recheck_tier().await;
        let (leaf, dest_parent) = self.resolver.find_path(dest, true).await?;
        let src_leaf = src.path.file_name().unwrap_or_default();

        if dest_parent != src.parent_id {
            list::move_items(&self.client, std::slice::from_ref(&src.id), &dest_parent).await?;
        }
        if leaf != src_leaf {
            let encoded = self.resolver.encoder().encode(&leaf);
            list::rename_item(&self.client, &src.id, &encoded).await?;
        }

        // Identity is preserved: same id, size, and hash under a new path
        let mut moved = src.clone();
        moved.path = dest.clone();
        moved.parent_id = dest_parent;
        Ok(moved)
    }

    async fn copy_object(
        &self,
        src: &ObjectInfo,
        dest: &RemotePath,
    ) -> Result<ObjectInfo, StoreError> {
        let Some(hash) = src.md5.clone() else {
            return Err(StoreError::CantCopy(format!(
                "{}: source has no content hash",
                src.path
            )));
        };

        let (leaf, dest_parent) = self.resolver.find_path(dest, true).await?;
        let encoded = self.resolver.encoder().encode(&leaf);

        match upload::probe_instant(&self.client, &dest_parent, &encoded, &hash, src.size).await? {
            Some(id) => Ok(ObjectInfo {
                id,
                path: dest.clone(),
                size: src.size,
                mod_time: Some(chrono::Utc::now()),
                md5: Some(hash),
                parent_id: dest_parent,
                trashed: false,
                fetched: false,
            }),
            None => Err(StoreError::CantCopy(format!(
                "{}: server does not hold the bytes",
                src.path
            ))),
        }
    }

    async fn dir_move(
        &self,
        src_dir: &RemotePath,
        dest_dir: &RemotePath,
    ) -> Result<(), StoreError> {
        if src_dir.is_root() {
            return Err(StoreError::CantDirMove(
                "cannot move the remote root".to_string(),
            ));
        }
        let src_id = self.resolver.find_dir(src_dir, false).await?;
        let src_parent = src_dir.parent().unwrap_or_else(RemotePath::root);
        let src_parent_id = self.resolver.find_dir(&src_parent, false).await?;
        let src_leaf = src_dir.file_name().unwrap_or_default();

        let (dest_leaf, dest_parent_id) = self.resolver.find_path(dest_dir, true).await?;
        if self
            .resolver
            .find_leaf(&dest_parent_id, &dest_leaf)
            .await?
            .is_some()
        {
            return Err(StoreError::DirExists(dest_dir.to_string()));
        }

        if dest_parent_id != src_parent_id {
            list::move_items(&self.client, std::slice::from_ref(&src_id), &dest_parent_id).await?;
        }
        if dest_leaf != src_leaf {
            let encoded = self.resolver.encoder().encode(&dest_leaf);
            list::rename_item(&self.client, &src_id, &encoded).await?;
        }

        // Everything cached below either path may now be stale
        self.resolver.cache().flush(src_dir);
        self.resolver.cache().flush(dest_dir);
        Ok(())
    }

    async fn remove(&self, object: &ObjectInfo) -> Result<(), StoreError> {
        list::trash_batch(&self.client, std::slice::from_ref(&object.id)).await?;
        Ok(())
    }

    async fn purge(&self, dir: &RemotePath) -> Result<(), StoreError> {
        let dir_id = self.resolver.find_dir(dir, false).await?;

        // Children before parents, so parents stay valid while their
        // contents are being trashed
        let mut ids = list::collect_descendants(&self.client, &dir_id).await?;
        if !dir.is_root() {
            ids.push(dir_id);
        }
        info!(dir = %dir, count = ids.len(), "purging subtree");
        list::trash_batch(&self.client, &ids).await?;

        self.resolver.cache().flush(dir);
        Ok(())
    }

    async fn clean_up(&self) -> Result<(), StoreError> {
        let root = self.resolver.cache().root_id().clone();
        let ids = list::collect_trashed(&self.client, &root).await?;
        info!(count = ids.len(), "permanently deleting trashed entries");
        list::delete_batch(&self.client, &ids).await?;
        Ok(())
    }

    async fn about(&self) -> Result<Quota, StoreError> {
        let info = self.client.user_info().await?;
        Ok(info.quota())
    }

    async fn public_link(
        &self,
        path: &RemotePath,
        expiry_days: u32,
        unlink: bool,
    ) -> Result<String, StoreError> {
        if unlink {
            return Err(StoreError::Unsupported("unlink"));
        }

        // The target may be a directory or a file
        let id = match self.resolver.find_dir(path, false).await {
            Ok(id) => id,
            Err(StoreError::DirNotFound(_)) => self.stat(path).await?.id,
            Err(other) => return Err(other),
        };

        let name = path.file_name().unwrap_or("share");
        let body = json!({
            "shareName": self.resolver.encoder().encode(name),
            "shareExpire": snap_share_expiry(expiry_days),
            "fileIDList": [numeric_id(&id)?],
        });
        let data: ShareData = self
            .client
            .post_data(ApiCategory::Share, SHARE_PATH, body)
            .await?;

        Ok(format!("{SHARE_URL_PREFIX}{}", data.share_key))
    }
}

// ============================================================================
// Tests
// ============================================================================
