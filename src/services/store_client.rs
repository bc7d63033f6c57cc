//! src/services/store_client.rs
//!
//! Object-store client adapter. `ObjectStore` is the primitive surface the
//! folder engine is written against; `S3Store` implements it over
//! `aws-sdk-s3`. Every primitive is a single bounded request with no retry:
//! failures come back as `StoreError` and retry policy belongs to callers.
//!
//! `ClientPool` hands out clients keyed by the fingerprint of a destination's
//! connection settings, so a client is reused only for a byte-identical
//! configuration.

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{Delete, MetadataDirective, ObjectIdentifier},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::destination::ConnectionConfig;

/// Store-imposed ceiling on keys per batch delete.
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Longest expiry SigV4 presigning accepts (seven days).
pub const MAX_PRESIGN_TTL: Duration = Duration::from_secs(604_800);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("invalid connection settings: {0}")]
    InvalidConfig(String),
    #[error("{operation} failed with {code}: {message}")]
    Remote {
        operation: &'static str,
        code: String,
        message: String,
    },
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Message safe to hand to callers: operation and remote error code only.
    pub fn public_message(&self) -> String {
        match self {
            StoreError::NotFound(what) => what.clone(),
            StoreError::InvalidConfig(reason) => format!("Invalid connection settings: {reason}"),
            StoreError::Remote {
                operation, code, ..
            } => format!("Object store {operation} failed ({code})"),
            StoreError::Transport { operation, .. } => {
                format!("Object store {operation} failed (unreachable)")
            }
        }
    }
}

/// One entry of a list-objects page.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    /// Set while more pages remain.
    pub next_continuation_token: Option<String>,
}

/// Raw head-object result; metadata is exactly what the store returned.
#[derive(Clone, Debug, Default)]
pub struct HeadResult {
    pub metadata: HashMap<String, String>,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Primitive operations of one tenant's object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> StoreResult<Vec<String>>;

    async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> StoreResult<ListPage>;

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<HeadResult>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<()>;

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        content_disposition: Option<&str>,
    ) -> StoreResult<String>;

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StoreResult<String>;

    /// Copy within or across buckets. `replace_metadata` switches the
    /// directive from COPY to REPLACE with the given (already encoded) map.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace_metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Delete up to `DELETE_BATCH_SIZE` keys in one request.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<()>;

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> StoreResult<()>;
}

/// Builds store clients from connection settings.
pub trait StoreConnector: Send + Sync {
    fn connect(&self, config: &ConnectionConfig) -> StoreResult<Arc<dyn ObjectStore>>;
}

/// Reject configurations no client could be built from.
pub fn validate_connection(config: &ConnectionConfig) -> StoreResult<()> {
    if config.endpoint.trim().is_empty() {
        return Err(StoreError::InvalidConfig("endpoint is required".into()));
    }
    if config.access_key_id.is_empty() {
        return Err(StoreError::InvalidConfig("access key id is required".into()));
    }
    if config.secret_access_key.is_empty() {
        return Err(StoreError::InvalidConfig(
            "secret access key is required".into(),
        ));
    }
    Ok(())
}

/// `StoreConnector` producing `aws-sdk-s3` clients with static credentials.
#[derive(Clone, Copy, Debug, Default)]
pub struct S3Connector;

impl StoreConnector for S3Connector {
    fn connect(&self, config: &ConnectionConfig) -> StoreResult<Arc<dyn ObjectStore>> {
        Ok(Arc::new(S3Store::new(config)?))
    }
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(config: &ConnectionConfig) -> StoreResult<Self> {
        validate_connection(config)?;

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "bucket-gateway",
        );
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region_or_default().to_string()))
            .endpoint_url(config.endpoint.trim_end_matches('/'))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_buckets(&self) -> StoreResult<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|err| map_sdk_error("list_buckets", err))?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.filter(|d| !d.is_empty()).map(str::to_string))
            .set_continuation_token(continuation_token.map(str::to_string))
            .send()
            .await
            .map_err(|err| map_sdk_error("list_objects_v2", err))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0),
                    last_modified: obj.last_modified().and_then(to_chrono),
                    etag: obj.e_tag().map(str::to_string),
                    storage_class: obj.storage_class().map(|c| c.as_str().to_string()),
                })
            })
            .collect();
        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix())
            .map(str::to_string)
            .collect();
        let next_continuation_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_continuation_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<HeadResult> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error("head_object", err))?;
        Ok(HeadResult {
            metadata: output.metadata().cloned().unwrap_or_default(),
            content_type: output.content_type().map(str::to_string),
            content_length: output.content_length(),
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|err| map_sdk_error("put_object", err))?;
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        content_disposition: Option<&str>,
    ) -> StoreResult<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_response_content_disposition(content_disposition.map(str::to_string))
            .presigned(presigning_config(expires_in)?)
            .await
            .map_err(|err| map_sdk_error("presign_get", err))?;
        Ok(presigned.uri().to_string())
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StoreResult<String> {
        let presigned = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config(expires_in)?)
            .await
            .map_err(|err| map_sdk_error("presign_put", err))?;
        Ok(presigned.uri().to_string())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace_metadata: Option<HashMap<String, String>>,
    ) -> StoreResult<()> {
        let mut request = self
            .client
            .copy_object()
            .bucket(dst_bucket)
            .copy_source(copy_source(src_bucket, src_key))
            .key(dst_key);
        if let Some(metadata) = replace_metadata {
            request = request
                .metadata_directive(MetadataDirective::Replace)
                .set_metadata(Some(metadata));
        }
        request
            .send()
            .await
            .map_err(|err| map_sdk_error("copy_object", err))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error("delete_object", err))?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > DELETE_BATCH_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "batch of {} keys exceeds the {DELETE_BATCH_SIZE} key limit",
                keys.len()
            )));
        }

        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StoreError::Transport {
                operation: "delete_objects",
                message: err.to_string(),
            })?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|err| StoreError::Transport {
                operation: "delete_objects",
                message: err.to_string(),
            })?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| map_sdk_error("delete_objects", err))?;

        // Quiet mode reports only the keys that failed.
        if let Some(first) = output.errors().first() {
            return Err(StoreError::Remote {
                operation: "delete_objects",
                code: first.code().unwrap_or("Unknown").to_string(),
                message: format!(
                    "{} of {} keys not deleted, first `{}`: {}",
                    output.errors().len(),
                    keys.len(),
                    first.key().unwrap_or_default(),
                    first.message().unwrap_or_default()
                ),
            });
        }
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| map_sdk_error("create_bucket", err))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| map_sdk_error("delete_bucket", err))?;
        Ok(())
    }
}

fn presigning_config(expires_in: Duration) -> StoreResult<PresigningConfig> {
    PresigningConfig::expires_in(expires_in)
        .map_err(|err| StoreError::InvalidConfig(format!("invalid presign expiry: {err}")))
}

/// `bucket/key` with each key segment percent-encoded and `/` kept.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded_key = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{bucket}/{encoded_key}")
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn map_sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    match &err {
        SdkError::ServiceError(service_err) => {
            let inner = service_err.err();
            let code = inner.code().unwrap_or("Unknown").to_string();
            let message = inner.message().unwrap_or_default().to_string();
            if matches!(code.as_str(), "NoSuchKey" | "NoSuchBucket" | "NotFound") {
                StoreError::NotFound(format!("{operation}: {code}"))
            } else {
                StoreError::Remote {
                    operation,
                    code,
                    message,
                }
            }
        }
        _ => StoreError::Transport {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

/// Clients keyed by connection fingerprint, with explicit eviction.
#[derive(Clone)]
pub struct ClientPool {
    connector: Arc<dyn StoreConnector>,
    clients: Arc<RwLock<HashMap<String, Arc<dyn ObjectStore>>>>,
}

impl ClientPool {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reuse the client built for an identical configuration or build one.
    pub fn client_for(&self, config: &ConnectionConfig) -> StoreResult<Arc<dyn ObjectStore>> {
        let key = config.fingerprint();
        if let Some(client) = self.clients.read().get(&key) {
            return Ok(client.clone());
        }

        let client = self.connector.connect(config)?;
        let mut clients = self.clients.write();
        // Another request may have raced us here; keep whichever landed first.
        let entry = clients.entry(key).or_insert_with(|| {
            debug!(endpoint = %config.endpoint, "built object store client");
            client
        });
        Ok(entry.clone())
    }

    /// Drop the client for `config`, if one was built.
    pub fn evict(&self, config: &ConnectionConfig) -> bool {
        let removed = self.clients.write().remove(&config.fingerprint()).is_some();
        if removed {
            info!(endpoint = %config.endpoint, "evicted object store client");
        }
        removed
    }

    pub fn clear(&self) {
        self.clients.write().clear();
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check settings with an unpooled client; never fails.
    pub async fn test_connection(&self, config: &ConnectionConfig) -> ConnectionTest {
        let result = match self.connector.connect(config) {
            Ok(client) => client.list_buckets().await,
            Err(err) => Err(err),
        };
        match result {
            Ok(buckets) => ConnectionTest {
                success: true,
                message: "Connection successful".into(),
                buckets: Some(buckets),
            },
            Err(err) => {
                debug!(error = %err, endpoint = %config.endpoint, "connection test failed");
                ConnectionTest {
                    success: false,
                    message: err.public_message(),
                    buckets: None,
                }
            }
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryConnector;

    fn config(endpoint: &str) -> ConnectionConfig {
        ConnectionConfig {
            endpoint: endpoint.into(),
            region: "us-east-1".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            force_path_style: true,
        }
    }

    #[test]
    fn copy_source_keeps_slashes() {
        assert_eq!(copy_source("b", "a/b c/d.txt"), "b/a/b%20c/d.txt");
        assert_eq!(copy_source("b", "plain"), "b/plain");
    }

    #[test]
    fn validate_connection_requires_fields() {
        assert!(validate_connection(&config("http://x")).is_ok());
        assert!(validate_connection(&config(" ")).is_err());
        let mut missing_secret = config("http://x");
        missing_secret.secret_access_key.clear();
        assert!(matches!(
            validate_connection(&missing_secret),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn s3_store_builds_without_network() {
        assert!(S3Store::new(&config("http://127.0.0.1:9000")).is_ok());
    }

    #[test]
    fn pool_reuses_identical_config_and_rebuilds_on_change() {
        let connector = Arc::new(MemoryConnector::default());
        let pool = ClientPool::new(connector.clone());

        let a = config("http://a");
        pool.client_for(&a).unwrap();
        pool.client_for(&a.clone()).unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(pool.len(), 1);

        let mut changed = a.clone();
        changed.region = "eu-west-1".into();
        pool.client_for(&changed).unwrap();
        assert_eq!(connector.connects(), 2);
        assert_eq!(pool.len(), 2);

        assert!(pool.evict(&a));
        assert!(!pool.evict(&a));
        pool.client_for(&a).unwrap();
        assert_eq!(connector.connects(), 3);

        pool.clear();
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_connection_reports_failure_without_error() {
        let pool = ClientPool::new(Arc::new(MemoryConnector::default()));
        let mut bad = config("http://a");
        bad.access_key_id.clear();
        let result = pool.test_connection(&bad).await;
        assert!(!result.success);
        assert!(result.buckets.is_none());
        assert_eq!(pool.len(), 0);

        let ok = pool.test_connection(&config("http://a")).await;
        assert!(ok.success);
        assert_eq!(ok.buckets, Some(vec![]));
    }

    #[test]
    fn public_message_omits_remote_message() {
        let err = StoreError::Remote {
            operation: "list_buckets",
            code: "InvalidAccessKeyId".into(),
            message: "The AWS Access Key Id AKIAXXX does not exist".into(),
        };
        let msg = err.public_message();
        assert!(msg.contains("InvalidAccessKeyId"));
        assert!(!msg.contains("AKIAXXX"));
    }
}
