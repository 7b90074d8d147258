//! Directory listing, recursion, and batched mutations
//!
//! Provides the paginated listing primitive everything else builds on,
//! plus the mutation calls that operate on ids: mkdir, move, rename,
//! and the batched trash / permanent-delete endpoints.
//!
//! Listings include trashed entries; callers filter by context (visible
//! listings drop them, trash cleanup keeps only them).

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use openpan_core::domain::newtypes::{FileId, Md5Hash};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::client::{numeric_id, PanClient};
use crate::pacer::{jittered_backoff, ApiCategory};
use crate::PanError;

/// Page size for directory listings
const PAGE_LIMIT: u32 = 100;

/// Cursor sentinel the provider uses to signal end-of-list
const END_OF_LIST: i64 = -1;

/// Maximum ids per batched trash/delete/move request
const BATCH_LIMIT: usize = 100;

/// How many times an emptiness check re-lists before trusting "empty"
const EMPTY_CHECK_ATTEMPTS: u32 = 3;

/// Base delay between emptiness re-checks; grows linearly per attempt
const EMPTY_CHECK_DELAY: Duration = Duration::from_millis(250);

/// Retry budget for renames rejected right after a move
const RENAME_BUSY_RETRIES: u32 = 5;

/// Message marker of the post-move rename rejection
const RENAME_BUSY_MARKER: &str = "rename uncompleted";

const LIST_PATH: &str = "/api/v2/file/list";
const MKDIR_PATH: &str = "/api/v1/file/mkdir";
const MOVE_PATH: &str = "/api/v1/file/move";
const RENAME_PATH: &str = "/api/v1/file/name";
const TRASH_PATH: &str = "/api/v1/file/trash";
const DELETE_PATH: &str = "/api/v1/file/delete";

// ============================================================================
// Wire types
// ============================================================================

/// One entry from a directory listing page
///
/// `filename` is in the provider's encoded form; decoding happens at the
/// store boundary. Ids arrive as JSON integers and are normalised by
/// `FileId`'s deserializer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Provider-assigned id
    pub file_id: FileId,
    /// Encoded leaf name
    pub filename: String,
    /// 0 = file, 1 = folder
    #[serde(rename = "type")]
    pub kind: u8,
    /// Size in bytes; zero for folders
    #[serde(default)]
    pub size: u64,
    /// Content MD5 as hex; empty for folders
    #[serde(default)]
    pub etag: String,
    /// Id of the containing directory
    pub parent_file_id: FileId,
    /// Non-zero if the entry sits in the trash
    #[serde(default)]
    pub trashed: u8,
    /// Last update timestamp as rendered by the provider
    #[serde(default)]
    pub update_at: Option<String>,
}

impl FileEntry {
    /// Returns true if the entry is a folder
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == 1
    }

    /// Returns true if the entry sits in the trash
    #[must_use]
    pub fn is_trashed(&self) -> bool {
        self.trashed != 0
    }

    /// The content hash, when present and well-formed
    #[must_use]
    pub fn md5(&self) -> Option<Md5Hash> {
        Md5Hash::new(self.etag.clone()).ok()
    }

    /// Best-effort parse of the provider's update timestamp
    #[must_use]
    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.update_at.as_deref()?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// One page of a directory listing
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListData {
    /// Cursor for the next page; -1 means this was the last page
    pub last_file_id: i64,
    /// Entries on this page
    #[serde(default)]
    pub file_list: Vec<FileEntry>,
}

/// Payload of the mkdir endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MkdirData {
    /// Id of the created (or pre-existing) directory
    #[serde(rename = "dirID")]
    dir_id: FileId,
}

// ============================================================================
// Paginated listing
// ============================================================================

/// Fetch a single listing page
async fn list_page(
    client: &PanClient,
    parent_id: &FileId,
    cursor: i64,
) -> Result<FileListData, PanError> {
    let query = [
        ("parentFileId", parent_id.to_string()),
        ("limit", PAGE_LIMIT.to_string()),
        ("lastFileId", cursor.to_string()),
    ];
    client
        .get_data(ApiCategory::FileList, LIST_PATH, &query)
        .await
}

/// List every entry under a directory, following pagination to the end
///
/// Trashed entries are included; filter by context.
pub async fn list_all(client: &PanClient, parent_id: &FileId) -> Result<Vec<FileEntry>, PanError> {
    let mut entries = Vec::new();
    let mut cursor = 0i64;

    loop {
        let page = list_page(client, parent_id, cursor).await?;
        debug!(
            parent = %parent_id,
            page_len = page.file_list.len(),
            cursor = page.last_file_id,
            "listing page fetched"
        );
        entries.extend(page.file_list);
        if page.last_file_id == END_OF_LIST {
            return Ok(entries);
        }
        cursor = page.last_file_id;
    }
}

/// Check whether a directory has any visible (non-trashed) children
///
/// Only the first page is consulted: one visible entry is enough.
pub async fn has_visible_children(
    client: &PanClient,
    dir_id: &FileId,
) -> Result<bool, PanError> {
    let page = list_page(client, dir_id, 0).await?;
    Ok(page.file_list.iter().any(|e| !e.is_trashed()))
}

/// Confirm a directory is empty, re-checking against eventual consistency
///
/// A single empty listing can lag a recent upload, so the check is
/// repeated a bounded number of times with linearly increasing delays.
/// Returns false as soon as any check sees a visible child.
pub async fn confirm_empty(client: &PanClient, dir_id: &FileId) -> Result<bool, PanError> {
    for attempt in 0..EMPTY_CHECK_ATTEMPTS {
        if has_visible_children(client, dir_id).await? {
            return Ok(false);
        }
        if attempt + 1 < EMPTY_CHECK_ATTEMPTS {
            tokio::time::sleep(EMPTY_CHECK_DELAY * (attempt + 1)).await;
        }
    }
    Ok(true)
}

// ============================================================================
// Recursive id collection
// ============================================================================

/// Collect every descendant id below a directory, deepest first
///
/// Children precede their parents in the returned order, so batch
/// trashing can proceed front-to-back while parents remain valid.
/// The starting directory itself is not included.
pub fn collect_descendants<'a>(
    client: &'a PanClient,
    dir_id: &'a FileId,
) -> BoxFuture<'a, Result<Vec<FileId>, PanError>> {
    async move {
        let mut out = Vec::new();
        for entry in list_all(client, dir_id).await? {
            if entry.is_dir() {
                let mut below = collect_descendants(client, &entry.file_id).await?;
                out.append(&mut below);
            }
            out.push(entry.file_id);
        }
        Ok(out)
    }
    .boxed()
}

/// Collect the ids of every trashed entry below a directory, deepest first
pub fn collect_trashed<'a>(
    client: &'a PanClient,
    dir_id: &'a FileId,
) -> BoxFuture<'a, Result<Vec<FileId>, PanError>> {
    async move {
        let mut out = Vec::new();
        for entry in list_all(client, dir_id).await? {
            if entry.is_dir() {
                let mut below = collect_trashed(client, &entry.file_id).await?;
                out.append(&mut below);
            }
            if entry.is_trashed() {
                out.push(entry.file_id);
            }
        }
        Ok(out)
    }
    .boxed()
}

// ============================================================================
// Batched mutations
// ============================================================================

/// Render a chunk of ids as the numeric array the wire expects
fn numeric_ids(ids: &[FileId]) -> Result<Vec<i64>, PanError> {
    ids.iter().map(numeric_id).collect()
}

/// Move a set of ids to the trash, chunked at the batch limit
pub async fn trash_batch(client: &PanClient, ids: &[FileId]) -> Result<(), PanError> {
    for chunk in ids.chunks(BATCH_LIMIT) {
        let body = json!({ "fileIDs": numeric_ids(chunk)? });
        client
            .post_unit(ApiCategory::Trash, TRASH_PATH, body)
            .await?;
        debug!(count = chunk.len(), "trashed batch");
    }
    Ok(())
}

/// Permanently delete a set of (already trashed) ids, chunked
pub async fn delete_batch(client: &PanClient, ids: &[FileId]) -> Result<(), PanError> {
    for chunk in ids.chunks(BATCH_LIMIT) {
        let body = json!({ "fileIDs": numeric_ids(chunk)? });
        client
            .post_unit(ApiCategory::Delete, DELETE_PATH, body)
            .await?;
        debug!(count = chunk.len(), "deleted batch");
    }
    Ok(())
}

/// Move ids under a new parent directory
pub async fn move_items(
    client: &PanClient,
    ids: &[FileId],
    to_parent: &FileId,
) -> Result<(), PanError> {
    for chunk in ids.chunks(BATCH_LIMIT) {
        let body = json!({
            "fileIDs": numeric_ids(chunk)?,
            "toParentFileID": numeric_id(to_parent)?,
        });
        client.post_unit(ApiCategory::Move, MOVE_PATH, body).await?;
    }
    Ok(())
}

/// Rename a single entry's leaf name
///
/// Some providers reject a rename issued immediately after a move with a
/// "rename uncompleted" error; that outcome is retried with backoff.
pub async fn rename_item(
    client: &PanClient,
    id: &FileId,
    new_name: &str,
) -> Result<(), PanError> {
    let body = json!({
        "fileId": numeric_id(id)?,
        "fileName": new_name,
    });

    let mut attempt = 0;
    loop {
        match client
            .put_unit(ApiCategory::Rename, RENAME_PATH, body.clone())
            .await
        {
            Ok(()) => return Ok(()),
            Err(PanError::Api { code, message })
                if message.to_ascii_lowercase().contains(RENAME_BUSY_MARKER)
                    && attempt < RENAME_BUSY_RETRIES =>
            {
                let delay = jittered_backoff(attempt, Duration::from_millis(500), Duration::from_secs(5));
                info!(
                    id = %id,
                    code,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rename not yet consistent, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Create a directory under a parent, returning its id
///
/// The provider treats mkdir as idempotent: creating an existing name
/// returns the existing directory's id.
pub async fn mkdir(
    client: &PanClient,
    parent_id: &FileId,
    name: &str,
) -> Result<FileId, PanError> {
    let body = json!({
        "parentID": numeric_id(parent_id)?,
        "name": name,
    });
    let data: MkdirData = client
        .post_data(ApiCategory::Mkdir, MKDIR_PATH, body)
        .await?;
    Ok(data.dir_id)
}

// ============================================================================
// Tests
// ============================================================================
