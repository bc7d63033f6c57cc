//! In-memory `ObjectStore` used by the test suites.
//!
//! Mirrors the S3 behaviours the gateway depends on: paged listing with
//! continuation tokens, delimiter grouping, lowercased metadata keys, and
//! idempotent deletes. Individual operations can be made to fail to exercise
//! partially-applied composite operations.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use super::store_client::{
    DELETE_BATCH_SIZE, HeadResult, ListPage, ObjectStore, ObjectSummary, StoreConnector,
    StoreError, StoreResult, validate_connection,
};
use crate::models::destination::ConnectionConfig;

#[derive(Clone, Debug)]
struct StoredObject {
    body: Bytes,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
    etag: String,
    last_modified: DateTime<Utc>,
}

pub struct MemoryStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    page_size: usize,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<&'static str>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(1000)
    }
}

impl MemoryStore {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn add_bucket(&self, bucket: &str) {
        self.buckets.lock().entry(bucket.to_string()).or_default();
    }

    pub fn put(&self, bucket: &str, key: &str, body: &[u8]) {
        self.put_with_metadata(bucket, key, body, HashMap::new());
    }

    pub fn put_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: HashMap<String, String>,
    ) {
        let object = StoredObject {
            body: Bytes::copy_from_slice(body),
            content_type: None,
            metadata: lowercase_keys(metadata),
            etag: format!("\"{:x}\"", md5::compute(body)),
            last_modified: Utc::now(),
        };
        self.buckets
            .lock()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn size_of(&self, bucket: &str, key: &str) -> Option<usize> {
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.body.len())
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().contains_key(bucket)
    }

    /// Make every call of `operation` fail until `heal` is called.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|op| **op == operation).count()
    }

    fn enter(&self, operation: &'static str) -> StoreResult<()> {
        self.calls.lock().push(operation);
        if self.failing.lock().contains(operation) {
            return Err(StoreError::Remote {
                operation,
                code: "InternalError".into(),
                message: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn missing_bucket(bucket: &str) -> StoreError {
        StoreError::NotFound(format!("bucket `{bucket}` not found"))
    }
}

fn lowercase_keys(metadata: HashMap<String, String>) -> HashMap<String, String> {
    metadata
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect()
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> StoreResult<Vec<String>> {
        self.enter("list_buckets")?;
        Ok(self.buckets.lock().keys().cloned().collect())
    }

    async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        self.enter("list_objects_v2")?;
        let buckets = self.buckets.lock();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;

        let mut page = ListPage::default();
        let mut prefixes = BTreeSet::new();
        let mut entries = 0;
        let mut last_consumed: Option<&String> = None;

        let candidates = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation_token.is_none_or(|token| key.as_str() > token));

        for (key, object) in candidates {
            let grouped = delimiter.filter(|d| !d.is_empty()).and_then(|d| {
                key[prefix.len()..]
                    .find(d)
                    .map(|pos| key[..prefix.len() + pos + d.len()].to_string())
            });
            if let Some(common) = &grouped {
                if prefixes.contains(common) {
                    last_consumed = Some(key);
                    continue;
                }
            }
            if entries == self.page_size {
                page.next_continuation_token = last_consumed.cloned();
                break;
            }
            entries += 1;
            last_consumed = Some(key);
            match grouped {
                Some(common) => {
                    prefixes.insert(common);
                }
                None => page.objects.push(ObjectSummary {
                    key: key.clone(),
                    size: object.body.len() as i64,
                    last_modified: Some(object.last_modified),
                    etag: Some(object.etag.clone()),
                    storage_class: Some("STANDARD".into()),
                }),
            }
        }
        page.common_prefixes = prefixes.into_iter().collect();
        Ok(page)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<HeadResult> {
        self.enter("head_object")?;
        let buckets = self.buckets.lock();
        let object = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?
            .get(key)
            .ok_or_else(|| StoreError::NotFound(format!("object `{key}` not found")))?;
        Ok(HeadResult {
            metadata: object.metadata.clone(),
            content_type: object.content_type.clone(),
            content_length: Some(object.body.len() as i64),
            last_modified: Some(object.last_modified),
            etag: Some(object.etag.clone()),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        self.enter("put_object")?;
        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                etag: format!("\"{:x}\"", md5::compute(&body)),
                body,
                content_type: content_type.map(str::to_string),
                metadata: HashMap::new(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        content_disposition: Option<&str>,
    ) -> StoreResult<String> {
        self.enter("presign_get")?;
        let mut url = format!(
            "memory://{bucket}/{key}?X-Amz-Expires={}",
            expires_in.as_secs()
        );
        if let Some(disposition) = content_disposition {
            url.push_str("&response-content-disposition=");
            url.push_str(&urlencoding::encode(disposition));
        }
        Ok(url)
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StoreResult<String> {
        self.enter("presign_put")?;
        Ok(format!(
            "memory://{bucket}/{key}?X-Amz-Expires={}&content-type={}",
            expires_in.as_secs(),
            urlencoding::encode(content_type)
        ))
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace_metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()> {
        self.enter("copy_object")?;
        let mut buckets = self.buckets.lock();
        let mut object = buckets
            .get(src_bucket)
            .ok_or_else(|| Self::missing_bucket(src_bucket))?
            .get(src_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("object `{src_key}` not found")))?;
        if let Some(metadata) = replace_metadata {
            object.metadata = lowercase_keys(metadata);
        }
        object.last_modified = Utc::now();
        buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| Self::missing_bucket(dst_bucket))?
            .insert(dst_key.to_string(), object);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.enter("delete_object")?;
        let mut buckets = self.buckets.lock();
        buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?
            .remove(key);
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        self.enter("delete_objects")?;
        assert!(keys.len() <= DELETE_BATCH_SIZE, "batch over store limit");
        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.enter("create_bucket")?;
        let mut buckets = self.buckets.lock();
        if buckets.contains_key(bucket) {
            return Err(StoreError::Remote {
                operation: "create_bucket",
                code: "BucketAlreadyOwnedByYou".into(),
                message: format!("bucket `{bucket}` exists"),
            });
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.enter("delete_bucket")?;
        let mut buckets = self.buckets.lock();
        match buckets.get(bucket) {
            None => Err(Self::missing_bucket(bucket)),
            Some(objects) if !objects.is_empty() => Err(StoreError::Remote {
                operation: "delete_bucket",
                code: "BucketNotEmpty".into(),
                message: format!("bucket `{bucket}` is not empty"),
            }),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }
}

/// Hands out one shared `MemoryStore` per endpoint and counts connects.
#[derive(Default)]
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn with_store(endpoint: &str, store: Arc<MemoryStore>) -> Self {
        let connector = Self::default();
        connector.stores.lock().insert(endpoint.to_string(), store);
        connector
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, config: &ConnectionConfig) -> StoreResult<Arc<dyn ObjectStore>> {
        validate_connection(config)?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        let store = self
            .stores
            .lock()
            .entry(config.endpoint.clone())
            .or_default()
            .clone();
        Ok(store)
    }
}
