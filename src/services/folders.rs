//! src/services/folders.rs
//!
//! Folder emulation over a flat key namespace. Folders are prefixes ending in
//! `/`; listings synthesize them from common prefixes. Composite operations
//! (folder delete, folder/object/bucket rename) are sequences of primitive
//! calls with no rollback:
//!
//! - renames run as a two-phase plan: every copy first, then chunked deletes
//!   of the originals. A copy failure loses nothing; a delete failure leaves
//!   duplicates under both names, which `reconcile_*` finishes off.
//! - deletes stream keys into `DELETE_BATCH_SIZE` chunks and report how far
//!   they got.
//!
//! Nothing here retries. Batches are issued sequentially.

use bytes::Bytes;
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, warn};

use super::{
    metadata_codec::{decode_metadata, encode_metadata},
    store_client::{DELETE_BATCH_SIZE, ObjectStore, StoreError, StoreResult},
};
use crate::{
    errors::{GatewayError, GatewayResult},
    models::listing::{FileItem, FolderItem, ListResult, ObjectHead, display_name},
};

pub const DEFAULT_DELIMITER: &str = "/";
pub const FOLDER_CONTENT_TYPE: &str = "application/x-directory";

/// Concurrent head requests while filling metadata columns.
const METADATA_FETCH_CONCURRENCY: usize = 8;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const RESERVED_BUCKET_PREFIXES: [&str; 3] = ["xn--", "sthree-", "amzn-s3-demo-"];
const RESERVED_BUCKET_SUFFIXES: [&str; 5] =
    ["-s3alias", "--ol-s3", ".mrap", "--x-s3", "--table-s3"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PageCursor {
    Start,
    After,
    Done,
}

/// Outcome of a folder delete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FolderDeletion {
    /// Deleted keys, not counting the folder's own marker.
    pub deleted_count: usize,
    pub marker_removed: bool,
}

/// Outcome of executing a rename plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenameOutcome {
    pub copied: usize,
    pub deleted: usize,
}

/// Enumerated moves of a rename: phase one copies every `(from, to)`,
/// phase two deletes every `from`.
#[derive(Clone, Debug)]
pub struct RenamePlan {
    pub src_bucket: String,
    pub dst_bucket: String,
    pub moves: Vec<(String, String)>,
}

impl RenamePlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

#[derive(Clone)]
pub struct FolderEngine {
    store: Arc<dyn ObjectStore>,
}

impl FolderEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// One delimited listing call. The marker object equal to `prefix` is
    /// never reported as a file. With `metadata_columns` configured each file
    /// gets its decoded metadata, or an empty map when its head fails.
    pub async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        metadata_columns: &[String],
    ) -> GatewayResult<ListResult> {
        let page = self
            .store
            .list_objects_v2(bucket, prefix, Some(delimiter), None)
            .await?;

        let mut files: Vec<FileItem> = page
            .objects
            .into_iter()
            .filter(|obj| obj.key != prefix)
            .map(|obj| FileItem {
                name: display_name(&obj.key, prefix),
                size: obj.size,
                last_modified: obj.last_modified.unwrap_or_else(chrono::Utc::now),
                etag: obj.etag.unwrap_or_default(),
                storage_class: obj.storage_class.unwrap_or_else(|| "STANDARD".into()),
                key: obj.key,
                metadata: None,
            })
            .collect();

        if !metadata_columns.is_empty() {
            let keys: Vec<String> = files.iter().map(|f| f.key.clone()).collect();
            let heads: Vec<BTreeMap<String, String>> = stream::iter(keys)
                .map(|key| async move {
                    match self.store.head_object(bucket, &key).await {
                        Ok(head) => decode_metadata(&head.metadata),
                        Err(err) => {
                            warn!(bucket, key = %key, error = %err, "metadata fetch failed");
                            BTreeMap::new()
                        }
                    }
                })
                .buffered(METADATA_FETCH_CONCURRENCY)
                .collect()
                .await;
            for (file, metadata) in files.iter_mut().zip(heads) {
                file.metadata = Some(metadata);
            }
        }

        let folders = page
            .common_prefixes
            .iter()
            .map(|p| FolderItem {
                prefix: p.clone(),
                name: display_name(p, prefix),
            })
            .collect();

        Ok(ListResult {
            files,
            folders,
            common_prefixes: page.common_prefixes,
            metadata_columns: (!metadata_columns.is_empty()).then(|| metadata_columns.to_vec()),
        })
    }

    /// Pages of keys under `prefix`, fetched lazily by following
    /// continuation tokens. Each call starts a fresh enumeration.
    pub fn key_pages<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, StoreResult<Vec<String>>> {
        stream::try_unfold(
            (PageCursor::Start, None::<String>),
            move |(cursor, token)| async move {
                if cursor == PageCursor::Done {
                    return Ok::<_, StoreError>(None);
                }
                let page = self
                    .store
                    .list_objects_v2(bucket, prefix, None, token.as_deref())
                    .await?;
                let next = match page.next_continuation_token {
                    Some(next) => (PageCursor::After, Some(next)),
                    None => (PageCursor::Done, None),
                };
                let keys = page.objects.into_iter().map(|o| o.key).collect();
                Ok(Some((keys, next)))
            },
        )
        .boxed()
    }

    /// Every key under `prefix`, one at a time.
    pub fn keys<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> BoxStream<'a, StoreResult<String>> {
        self.key_pages(bucket, prefix)
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    pub async fn collect_keys(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        self.keys(bucket, prefix).try_collect().await
    }

    /// Keys under `prefix` excluding the folder's own marker.
    pub async fn count_folder_contents(&self, bucket: &str, prefix: &str) -> GatewayResult<usize> {
        let count = self
            .keys(bucket, prefix)
            .try_fold(0usize, |acc, key| async move {
                Ok::<_, StoreError>(if key == prefix { acc } else { acc + 1 })
            })
            .await?;
        Ok(count)
    }

    /// Delete every key under `prefix` in sequential batches. Not atomic: on
    /// failure the error is returned and earlier batches stay deleted.
    pub async fn delete_folder(&self, bucket: &str, prefix: &str) -> GatewayResult<FolderDeletion> {
        ensure_folder_prefix("prefix", prefix)?;
        info!(bucket, prefix, "deleting folder");

        let mut outcome = FolderDeletion::default();
        let mut batch: Vec<String> = Vec::with_capacity(DELETE_BATCH_SIZE);
        let mut keys = self.keys(bucket, prefix);
        while let Some(key) = keys.try_next().await? {
            batch.push(key);
            if batch.len() == DELETE_BATCH_SIZE {
                self.delete_batch(bucket, prefix, &mut batch, &mut outcome)
                    .await?;
            }
        }
        drop(keys);
        if !batch.is_empty() {
            self.delete_batch(bucket, prefix, &mut batch, &mut outcome)
                .await?;
        }

        info!(bucket, prefix, deleted = outcome.deleted_count, "folder deleted");
        Ok(outcome)
    }

    async fn delete_batch(
        &self,
        bucket: &str,
        prefix: &str,
        batch: &mut Vec<String>,
        outcome: &mut FolderDeletion,
    ) -> GatewayResult<()> {
        self.store.delete_objects(bucket, batch).await.map_err(|err| {
            warn!(
                bucket,
                prefix,
                deleted_so_far = outcome.deleted_count,
                error = %err,
                "folder delete aborted"
            );
            err
        })?;
        debug!(bucket, batch = batch.len(), "deleted batch");
        for key in batch.drain(..) {
            if key == prefix {
                outcome.marker_removed = true;
            } else {
                outcome.deleted_count += 1;
            }
        }
        Ok(())
    }

    /// Enumerate the moves that take every key under `old_prefix` in
    /// `src_bucket` to `new_prefix` in `dst_bucket`.
    pub async fn plan_rename(
        &self,
        src_bucket: &str,
        dst_bucket: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> StoreResult<RenamePlan> {
        let moves = self
            .keys(src_bucket, old_prefix)
            .map_ok(|key| {
                let target = format!("{new_prefix}{}", &key[old_prefix.len()..]);
                (key, target)
            })
            .try_collect()
            .await?;
        Ok(RenamePlan {
            src_bucket: src_bucket.to_string(),
            dst_bucket: dst_bucket.to_string(),
            moves,
        })
    }

    /// Copy every move, then delete every original. With `tolerate_missing`
    /// a source that disappeared since planning is skipped instead of
    /// aborting, which is what makes re-running a plan safe.
    pub async fn execute_plan(
        &self,
        plan: &RenamePlan,
        tolerate_missing: bool,
    ) -> GatewayResult<RenameOutcome> {
        let mut outcome = RenameOutcome::default();
        let mut copied: Vec<String> = Vec::with_capacity(plan.moves.len());

        for (from, to) in &plan.moves {
            match self
                .store
                .copy_object(&plan.src_bucket, from, &plan.dst_bucket, to, None)
                .await
            {
                Ok(()) => {
                    outcome.copied += 1;
                    copied.push(from.clone());
                }
                Err(StoreError::NotFound(_)) if tolerate_missing => {
                    debug!(key = %from, "source already moved");
                }
                Err(err) => {
                    warn!(
                        src_bucket = %plan.src_bucket,
                        key = %from,
                        copied = outcome.copied,
                        error = %err,
                        "copy phase aborted; originals untouched"
                    );
                    return Err(err.into());
                }
            }
        }

        for chunk in copied.chunks(DELETE_BATCH_SIZE) {
            if let Err(err) = self.store.delete_objects(&plan.src_bucket, chunk).await {
                warn!(
                    src_bucket = %plan.src_bucket,
                    deleted = outcome.deleted,
                    remaining = copied.len() - outcome.deleted,
                    error = %err,
                    "delete phase aborted; duplicates remain until reconciled"
                );
                return Err(err.into());
            }
            outcome.deleted += chunk.len();
        }

        Ok(outcome)
    }

    /// Move every key under `old_prefix` to `new_prefix`. Returns how many
    /// objects were copied.
    pub async fn rename_folder(
        &self,
        bucket: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> GatewayResult<usize> {
        validate_folder_rename(old_prefix, new_prefix)?;
        info!(bucket, old_prefix, new_prefix, "renaming folder");
        let plan = self
            .plan_rename(bucket, bucket, old_prefix, new_prefix)
            .await?;
        let outcome = self.execute_plan(&plan, false).await?;
        info!(bucket, copied = outcome.copied, "folder renamed");
        Ok(outcome.copied)
    }

    /// Finish an interrupted folder rename. Safe to run any number of times;
    /// after a completed rename it does nothing.
    pub async fn reconcile_folder_rename(
        &self,
        bucket: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> GatewayResult<RenameOutcome> {
        validate_folder_rename(old_prefix, new_prefix)?;
        let plan = self
            .plan_rename(bucket, bucket, old_prefix, new_prefix)
            .await?;
        if plan.is_empty() {
            return Ok(RenameOutcome::default());
        }
        info!(bucket, old_prefix, pending = plan.moves.len(), "reconciling folder rename");
        self.execute_plan(&plan, true).await
    }

    /// Copy then delete a single object.
    pub async fn rename_object(&self, bucket: &str, old_key: &str, new_key: &str) -> GatewayResult<()> {
        if old_key.is_empty() || new_key.is_empty() {
            return Err(GatewayError::validation("oldKey and newKey are required"));
        }
        if old_key == new_key {
            return Err(GatewayError::validation(
                "oldKey and newKey must be different",
            ));
        }
        self.store
            .copy_object(bucket, old_key, bucket, new_key, None)
            .await?;
        self.store.delete_object(bucket, old_key).await?;
        Ok(())
    }

    /// Write the empty marker object that makes an otherwise empty folder
    /// visible in listings.
    pub async fn create_folder(&self, bucket: &str, prefix: &str) -> GatewayResult<()> {
        ensure_folder_prefix("prefix", prefix)?;
        self.store
            .put_object(bucket, prefix, Bytes::new(), Some(FOLDER_CONTENT_TYPE))
            .await?;
        info!(bucket, prefix, "folder created");
        Ok(())
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> GatewayResult<()> {
        if key.is_empty() {
            return Err(GatewayError::validation("Key required"));
        }
        self.store.delete_object(bucket, key).await?;
        Ok(())
    }

    pub async fn create_bucket(&self, bucket: &str) -> GatewayResult<()> {
        validate_bucket_name(bucket)?;
        self.store.create_bucket(bucket).await?;
        info!(bucket, "bucket created");
        Ok(())
    }

    /// Create `new_bucket`, move every key over, then drop `old_bucket`.
    /// No rollback: a failure after creation leaves both buckets with a split
    /// key set.
    pub async fn rename_bucket(&self, old_bucket: &str, new_bucket: &str) -> GatewayResult<usize> {
        validate_bucket_rename(old_bucket, new_bucket)?;
        info!(old_bucket, new_bucket, "renaming bucket");

        let plan = self.plan_rename(old_bucket, new_bucket, "", "").await?;
        self.store.create_bucket(new_bucket).await?;
        let outcome = self.execute_plan(&plan, false).await?;
        self.store.delete_bucket(old_bucket).await?;

        info!(old_bucket, new_bucket, copied = outcome.copied, "bucket renamed");
        Ok(outcome.copied)
    }

    /// Finish an interrupted bucket rename: create the target if missing,
    /// move whatever is left, and drop the source once empty.
    pub async fn reconcile_bucket_rename(
        &self,
        old_bucket: &str,
        new_bucket: &str,
    ) -> GatewayResult<RenameOutcome> {
        validate_bucket_rename(old_bucket, new_bucket)?;
        let existing = self.store.list_buckets().await?;
        if !existing.iter().any(|b| b == old_bucket) {
            return Ok(RenameOutcome::default());
        }
        if !existing.iter().any(|b| b == new_bucket) {
            self.store.create_bucket(new_bucket).await?;
        }
        let plan = self.plan_rename(old_bucket, new_bucket, "", "").await?;
        let outcome = self.execute_plan(&plan, true).await?;
        self.store.delete_bucket(old_bucket).await?;
        info!(old_bucket, new_bucket, moved = outcome.copied, "bucket rename reconciled");
        Ok(outcome)
    }

    pub async fn object_metadata(&self, bucket: &str, key: &str) -> GatewayResult<ObjectHead> {
        let head = self.store.head_object(bucket, key).await?;
        Ok(ObjectHead {
            metadata: decode_metadata(&head.metadata),
            content_type: head.content_type,
            content_length: head.content_length,
            last_modified: head.last_modified,
            etag: head.etag,
        })
    }

    /// Replace user metadata by copying the object onto itself.
    pub async fn update_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> GatewayResult<()> {
        let encoded = encode_metadata(metadata)?;
        self.store
            .copy_object(bucket, key, bucket, key, Some(encoded))
            .await?;
        Ok(())
    }
}

fn ensure_folder_prefix(field: &str, prefix: &str) -> GatewayResult<()> {
    if prefix.is_empty() {
        return Err(GatewayError::validation(format!("{field} is required")));
    }
    if !prefix.ends_with('/') {
        return Err(GatewayError::validation(format!("{field} must end with `/`")));
    }
    Ok(())
}

/// Folder renames may not move a folder into itself or onto its parent
/// chain: the copy targets would overlap the keys scheduled for deletion.
pub fn validate_folder_rename(old_prefix: &str, new_prefix: &str) -> GatewayResult<()> {
    ensure_folder_prefix("oldPrefix", old_prefix)?;
    ensure_folder_prefix("newPrefix", new_prefix)?;
    if old_prefix == new_prefix {
        return Err(GatewayError::validation(
            "oldPrefix and newPrefix must be different",
        ));
    }
    if new_prefix.starts_with(old_prefix) || old_prefix.starts_with(new_prefix) {
        return Err(GatewayError::validation(
            "oldPrefix and newPrefix must not contain one another",
        ));
    }
    Ok(())
}

fn validate_bucket_rename(old_bucket: &str, new_bucket: &str) -> GatewayResult<()> {
    if old_bucket.is_empty() {
        return Err(GatewayError::validation("oldBucketName is required"));
    }
    validate_bucket_name(new_bucket)?;
    if old_bucket == new_bucket {
        return Err(GatewayError::validation(
            "Old and new bucket names must be different",
        ));
    }
    Ok(())
}

/// Validate a bucket name against S3 naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - must start and end with a letter or digit
/// - no two adjacent periods, not formatted like an IPv4 address
/// - none of the reserved prefixes or suffixes
pub fn validate_bucket_name(name: &str) -> GatewayResult<()> {
    let invalid = |reason: &str| Err(GatewayError::validation(format!("Bucket name {reason}")));

    let len = name.len();
    if len < BUCKET_NAME_MIN_LEN {
        return invalid("must be at least 3 characters");
    }
    if len > BUCKET_NAME_MAX_LEN {
        return invalid("must be at most 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("must use only lowercase letters, numbers, hyphens and periods");
    }
    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
        return invalid("must start and end with a letter or number");
    }
    if name.contains("..") {
        return invalid("must not contain two adjacent periods");
    }
    if is_ipv4_like(name) {
        return invalid("must not be formatted as an IP address");
    }
    if let Some(prefix) = RESERVED_BUCKET_PREFIXES.iter().find(|p| name.starts_with(*p)) {
        return invalid(&format!("must not start with {prefix}"));
    }
    if let Some(suffix) = RESERVED_BUCKET_SUFFIXES.iter().find(|s| name.ends_with(*s)) {
        return invalid(&format!("must not end with {suffix}"));
    }
    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 3 && p.chars().all(|c| c.is_ascii_digit()))
}
