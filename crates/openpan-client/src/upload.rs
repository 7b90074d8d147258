//! Chunked upload engine with content-addressed deduplication
//!
//! Upload proceeds in four phases:
//! 1. **Staging** - the source stream is buffered (in memory up to a
//!    threshold, otherwise spooled to a temporary file) while its MD5 is
//!    computed; the provider requires the hash up front
//! 2. **Create probe** - the (hash, size) pair is offered to the
//!    upload-create endpoint; if the server already holds identical
//!    bytes it answers `reuse` with a file id and no data moves
//! 3. **Slices** - otherwise the staged content is cut into
//!    server-mandated slices, each uploaded as a multipart POST to the
//!    assigned upload server, in parallel up to the configured
//!    concurrency, with per-slice retries
//! 4. **Completion** - the completion endpoint is polled until the
//!    provider reports a file id, bounded by a total ceiling
//!
//! Cancellation is cooperative: the token aborts pending slice launches
//! and in-flight requests, and a best-effort abort releases the pending
//! preupload on the provider side. The temporary spool is removed on
//! every exit path (it is dropped with the staging handle).

use std::io::SeekFrom;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use md5::{Digest, Md5};
use openpan_core::domain::entry::ObjectInfo;
use openpan_core::domain::errors::StoreError;
use openpan_core::domain::newtypes::{FileId, Md5Hash, RemotePath};
use openpan_core::ports::remote_store::{PutSource, SeekableReader, SourceReader};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{numeric_id, PanClient};
use crate::pacer::{jittered_backoff, ApiCategory};

/// Sources up to this size are staged fully in memory (100 MiB)
const MEMORY_BUFFER_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Copy buffer size while spooling to disk
const SPOOL_CHUNK: usize = 1024 * 1024;

/// Retry budget per slice
const SLICE_RETRIES: u32 = 5;

/// Create-level retry budget when the provider's final hash disagrees
const CREATE_RETRIES: u32 = 3;

/// Interval between completion polls
const COMPLETE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Total completion-poll ceiling in seconds
const COMPLETE_POLL_CEILING_SECS: u64 = 120;

/// Duplicate policy: overwrite an existing entry with the same name
const DUPLICATE_OVERWRITE: u8 = 2;

const UPLOAD_CREATE_PATH: &str = "/api/v1/upload/create";
const UPLOAD_COMPLETE_PATH: &str = "/api/v1/upload/complete";
const UPLOAD_ABORT_PATH: &str = "/api/v1/upload/abort";
const SLICE_PATH: &str = "/upload/v1/file/slice";

// ============================================================================
// Wire types
// ============================================================================

/// Payload of the upload-create probe
#[derive(Debug, Deserialize)]
struct UploadCreateData {
    /// True when the server deduplicated against existing bytes
    #[serde(default)]
    reuse: bool,
    /// The new file's id on instant upload (zero otherwise)
    #[serde(rename = "fileID", default)]
    file_id: Option<FileId>,
    /// Handle binding slices and completion to this pending file
    #[serde(rename = "preuploadID", default)]
    preupload_id: Option<String>,
    /// Server-mandated slice size in bytes
    #[serde(rename = "sliceSize", default)]
    slice_size: u64,
    /// Upload server base URLs; the first is used
    #[serde(default)]
    servers: Vec<String>,
}

/// Payload of an upload-complete poll
#[derive(Debug, Deserialize)]
struct UploadCompleteData {
    /// True once the provider has assembled the file
    #[serde(default)]
    completed: bool,
    /// The final file id; zero until completed
    #[serde(rename = "fileID", default)]
    file_id: Option<FileId>,
    /// Final content hash as computed by the provider, when reported
    #[serde(default)]
    etag: Option<String>,
}

/// A non-zero file id, or None
fn nonzero_id(id: &Option<FileId>) -> Option<FileId> {
    id.as_ref().filter(|id| id.as_str() != "0").cloned()
}

// ============================================================================
// Content staging
// ============================================================================

/// Staged upload content with repeatable random access
///
/// The rewind variant serialises slice reads through a mutex, since a
/// single seekable source has one cursor. The spool variant owns a
/// `TempPath`, so the temporary file is removed when the staging handle
/// drops, on success and failure alike.
enum StagedContent {
    /// Whole content held in memory
    Memory(Vec<u8>),
    /// Rewindable source seeked per slice read
    Rewind(Mutex<Box<dyn SeekableReader>>),
    /// Content spooled to a temporary file
    Spool(tempfile::TempPath),
}

impl std::fmt::Debug for StagedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StagedContent::Memory(buf) => f.debug_tuple("Memory").field(&buf.len()).finish(),
            StagedContent::Rewind(_) => f.debug_tuple("Rewind").finish(),
            StagedContent::Spool(path) => f.debug_tuple("Spool").field(path).finish(),
        }
    }
}

impl StagedContent {
    /// Read `len` bytes starting at `offset`
    async fn read_slice(&self, offset: u64, len: usize) -> Result<Vec<u8>, StoreError> {
        match self {
            StagedContent::Memory(buf) => {
                let start = offset as usize;
                Ok(buf[start..start + len].to_vec())
            }
            StagedContent::Rewind(reader) => {
                let mut reader = reader.lock().await;
                reader.seek(SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len];
                reader.read_exact(&mut buf).await?;
                Ok(buf)
            }
            StagedContent::Spool(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
        }
    }
}

/// Lowercase hex MD5 of a byte slice
fn md5_hex(bytes: &[u8]) -> Md5Hash {
    let digest: [u8; 16] = Md5::digest(bytes).into();
    Md5Hash::from_digest(digest)
}

/// Hash a reader to exhaustion, returning (bytes read, hash)
async fn hash_reader<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(u64, Md5Hash), StoreError> {
    let mut hasher = Md5::new();
    let mut total: u64 = 0;
    let mut chunk = vec![0u8; SPOOL_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        total += n as u64;
    }

    let digest: [u8; 16] = hasher.finalize().into();
    Ok((total, Md5Hash::from_digest(digest)))
}

/// Drain the source while hashing, staging content for slice replay
///
/// Three strategies, picked by size and source capability: sources at
/// or under the memory threshold are buffered whole; larger seekable
/// sources are hashed in place and rewound; larger one-shot streams
/// are teed through the hasher into a temporary spool. A mismatch
/// between the declared size and the bytes actually read is a contract
/// violation and fails the upload outright.
async fn stage(source: PutSource, size: u64) -> Result<(StagedContent, Md5Hash), StoreError> {
    stage_with(source, size, MEMORY_BUFFER_THRESHOLD).await
}

async fn stage_with(
    mut source: PutSource,
    size: u64,
    memory_threshold: u64,
) -> Result<(StagedContent, Md5Hash), StoreError> {
    if size <= memory_threshold {
        let mut buf = Vec::with_capacity(size as usize);
        source.reader.read_to_end(&mut buf).await?;
        if buf.len() as u64 != size {
            return Err(StoreError::SizeMismatch {
                declared: size,
                hashed: buf.len() as u64,
            });
        }
        let hash = md5_hex(&buf);
        return Ok((StagedContent::Memory(buf), hash));
    }

    match source.reader {
        // Rewindable: stream through the hasher, then seek back
        SourceReader::Seekable(mut reader) => {
            let (total, hash) = hash_reader(&mut reader).await?;
            if total != size {
                return Err(StoreError::SizeMismatch {
                    declared: size,
                    hashed: total,
                });
            }
            reader.seek(SeekFrom::Start(0)).await?;
            debug!(size, "seekable source hashed and rewound");
            Ok((StagedContent::Rewind(Mutex::new(reader)), hash))
        }
        // One-shot stream too large to hold: tee through a hasher into
        // a temp spool, then replay slices from the spool
        SourceReader::Stream(mut reader) => {
            let spool = tempfile::NamedTempFile::new()?;
            let mut file = tokio::fs::File::from_std(spool.reopen()?);
            let mut hasher = Md5::new();
            let mut total: u64 = 0;
            let mut chunk = vec![0u8; SPOOL_CHUNK];

            loop {
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&chunk[..n]);
                file.write_all(&chunk[..n]).await?;
                total += n as u64;
            }
            file.flush().await?;

            if total != size {
                return Err(StoreError::SizeMismatch {
                    declared: size,
                    hashed: total,
                });
            }

            let digest: [u8; 16] = hasher.finalize().into();
            debug!(size, "source spooled to temp file");
            Ok((
                StagedContent::Spool(spool.into_temp_path()),
                Md5Hash::from_digest(digest),
            ))
        }
    }
}

// ============================================================================
// Protocol steps
// ============================================================================

/// Offer (hash, size) to the create endpoint
async fn upload_create(
    client: &PanClient,
    parent_id: &FileId,
    encoded_name: &str,
    hash: &Md5Hash,
    size: u64,
) -> Result<UploadCreateData, StoreError> {
    let body = json!({
        "parentFileID": numeric_id(parent_id)?,
        "filename": encoded_name,
        "etag": hash.as_str(),
        "size": size,
        "duplicate": DUPLICATE_OVERWRITE,
    });
    Ok(client
        .post_data(ApiCategory::UploadCreate, UPLOAD_CREATE_PATH, body)
        .await?)
}

/// Probe whether the server can create `encoded_name` from bytes it
/// already holds, without transferring anything
///
/// Returns the new file id on an instant hit. On a miss any pending
/// preupload the probe opened is released, and `None` is returned so
/// the caller can fall back to a streamed copy.
pub async fn probe_instant(
    client: &PanClient,
    parent_id: &FileId,
    encoded_name: &str,
    hash: &Md5Hash,
    size: u64,
) -> Result<Option<FileId>, StoreError> {
    let create = upload_create(client, parent_id, encoded_name, hash, size).await?;
    if create.reuse {
        if let Some(id) = nonzero_id(&create.file_id) {
            return Ok(Some(id));
        }
    }
    if let Some(preupload_id) = create.preupload_id.as_deref() {
        abort_upload(client, preupload_id).await;
    }
    Ok(None)
}

/// Best-effort release of a pending preupload
async fn abort_upload(client: &PanClient, preupload_id: &str) {
    let body = json!({ "preuploadID": preupload_id });
    if let Err(e) = client
        .post_unit(ApiCategory::UploadCreate, UPLOAD_ABORT_PATH, body)
        .await
    {
        debug!(error = %e, "upload abort ignored an error");
    }
}

/// Upload one slice with retries, honouring cancellation
#[allow(clippy::too_many_arguments)]
async fn upload_slice(
    client: &PanClient,
    token: &str,
    slice_url: &str,
    preupload_id: &str,
    content: &StagedContent,
    slice_no: u64,
    offset: u64,
    len: usize,
    cancel: &CancellationToken,
) -> Result<(), StoreError> {
    let bytes = content.read_slice(offset, len).await?;
    let slice_md5 = md5_hex(&bytes);

    let mut last_failure = String::new();
    for attempt in 0..SLICE_RETRIES {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let form = Form::new()
            .text("preuploadID", preupload_id.to_string())
            .text("sliceNo", slice_no.to_string())
            .text("sliceMD5", slice_md5.to_string())
            .part("slice", Part::bytes(bytes.clone()).file_name("slice"));

        let send = client
            .http()
            .post(slice_url)
            .bearer_auth(token)
            .header("Platform", "open_platform")
            .multipart(form)
            .send();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            outcome = send => outcome,
        };

        match outcome {
            Ok(response) if response.status().is_success() => {
                debug!(slice_no, len, attempt, "slice uploaded");
                return Ok(());
            }
            Ok(response) => {
                last_failure = format!("HTTP status {}", response.status());
            }
            Err(e) => {
                last_failure = e.to_string();
            }
        }

        let delay = jittered_backoff(attempt, Duration::from_millis(500), Duration::from_secs(8));
        warn!(
            slice_no,
            attempt,
            failure = %last_failure,
            delay_ms = delay.as_millis() as u64,
            "slice upload failed, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }

    Err(StoreError::Transport(format!(
        "slice {slice_no} failed after {SLICE_RETRIES} attempts: {last_failure}"
    )))
}

/// Upload every slice, bounded by `concurrency` in-flight at once
///
/// The first failing slice cancels its siblings through the token and
/// stops further launches.
#[allow(clippy::too_many_arguments)]
async fn upload_slices(
    client: &PanClient,
    slice_url: &str,
    preupload_id: &str,
    content: &StagedContent,
    size: u64,
    slice_size: u64,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<(), StoreError> {
    let token = client.broker().access_token().await?;
    let total_slices = size.div_ceil(slice_size);
    info!(total_slices, slice_size, concurrency, "starting slice uploads");

    let results: Vec<Result<(), StoreError>> = stream::iter(1..=total_slices)
        .map(|slice_no| {
            let token = token.clone();
            async move {
                let offset = (slice_no - 1) * slice_size;
                let len = slice_size.min(size - offset) as usize;
                let result = upload_slice(
                    client,
                    &token,
                    slice_url,
                    preupload_id,
                    content,
                    slice_no,
                    offset,
                    len,
                    cancel,
                )
                .await;
                if result.is_err() {
                    // Halt siblings and unlaunched slices
                    cancel.cancel();
                }
                result
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    // A failed slice cancels its siblings, so cancellation results may
    // outnumber the root failure; report the root failure when there is one.
    let mut cancelled = false;
    for result in results {
        match result {
            Ok(()) => {}
            Err(StoreError::Cancelled) => cancelled = true,
            Err(other) => return Err(other),
        }
    }
    if cancelled {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}

/// Poll the completion endpoint until a file id appears
async fn poll_complete(
    client: &PanClient,
    preupload_id: &str,
    cancel: &CancellationToken,
) -> Result<UploadCompleteData, StoreError> {
    for _ in 0..COMPLETE_POLL_CEILING_SECS {
        let body = json!({ "preuploadID": preupload_id });
        let data: UploadCompleteData = client
            .post_data(ApiCategory::UploadComplete, UPLOAD_COMPLETE_PATH, body)
            .await?;

        if data.completed && nonzero_id(&data.file_id).is_some() {
            return Ok(data);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            () = tokio::time::sleep(COMPLETE_POLL_INTERVAL) => {}
        }
    }

    Err(StoreError::UploadTimeout(COMPLETE_POLL_CEILING_SECS))
}

/// Build the destination handle for a freshly uploaded file
fn synthesize(
    id: FileId,
    dest: &RemotePath,
    parent_id: &FileId,
    size: u64,
    hash: &Md5Hash,
) -> ObjectInfo {
    ObjectInfo {
        id,
        path: dest.clone(),
        size,
        mod_time: Some(Utc::now()),
        md5: Some(hash.clone()),
        parent_id: parent_id.clone(),
        trashed: false,
        fetched: false,
    }
}

/// Join the slice endpoint path onto an upload-server base URL
fn slice_endpoint(server: &str) -> Result<String, StoreError> {
    let base = url::Url::parse(server)
        .map_err(|e| StoreError::Other(format!("bad upload server url {server}: {e}")))?;
    let joined = base
        .join(SLICE_PATH)
        .map_err(|e| StoreError::Other(format!("bad upload server url {server}: {e}")))?;
    Ok(joined.to_string())
}

// ============================================================================
// The upload operation
// ============================================================================

/// Upload a source stream as `dest` under `parent_id`
///
/// Implements the full create-probe / slice / complete protocol with
/// instant-upload short-circuiting. `encoded_name` is the leaf already
/// passed through the name encoder.
pub async fn upload(
    client: &PanClient,
    parent_id: &FileId,
    encoded_name: &str,
    dest: &RemotePath,
    source: PutSource,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<ObjectInfo, StoreError> {
    let Some(size) = source.size else {
        return Err(StoreError::UnknownSize(dest.to_string()));
    };
    if size == 0 {
        return Err(StoreError::CantUploadEmpty(dest.to_string()));
    }
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }

    let (content, hash) = stage(source, size).await?;

    for create_attempt in 0..CREATE_RETRIES {
        let create = upload_create(client, parent_id, encoded_name, &hash, size).await?;

        if create.reuse {
            if let Some(id) = nonzero_id(&create.file_id) {
                info!(id = %id, size, "instant upload: server already holds the bytes");
                return Ok(synthesize(id, dest, parent_id, size, &hash));
            }
        }

        let preupload_id = create
            .preupload_id
            .clone()
            .ok_or_else(|| StoreError::Other("upload-create returned no preupload id".into()))?;
        if create.slice_size == 0 {
            return Err(StoreError::Other("upload-create returned zero slice size".into()));
        }
        let server = create
            .servers
            .first()
            .ok_or_else(|| StoreError::Other("upload-create returned no servers".into()))?;
        let slice_url = slice_endpoint(server)?;

        let transfer = async {
            upload_slices(
                client,
                &slice_url,
                &preupload_id,
                &content,
                size,
                create.slice_size,
                concurrency,
                cancel,
            )
            .await?;
            poll_complete(client, &preupload_id, cancel).await
        };

        let complete = match transfer.await {
            Ok(complete) => complete,
            Err(err) => {
                // Release the pending preupload on cancellation and on
                // fatal slice/completion failures alike
                abort_upload(client, &preupload_id).await;
                return Err(err);
            }
        };

        let file_id = nonzero_id(&complete.file_id)
            .ok_or_else(|| StoreError::Other("completion reported no file id".into()))?;

        // Verify the provider's final hash when it reports one
        if let Some(remote) = complete.etag.as_deref() {
            if let Ok(remote_hash) = Md5Hash::new(remote.to_string()) {
                if remote_hash != hash {
                    warn!(
                        attempt = create_attempt,
                        local = %hash,
                        remote = %remote_hash,
                        "provider hash disagrees, re-creating upload"
                    );
                    if create_attempt + 1 < CREATE_RETRIES {
                        continue;
                    }
                    return Err(StoreError::HashMismatch {
                        expected: hash.to_string(),
                        actual: remote_hash.to_string(),
                    });
                }
            }
        }

        return Ok(synthesize(file_id, dest, parent_id, size, &hash));
    }

    unreachable!("create retry loop always returns")
}

// ============================================================================
// Tests
// ============================================================================
