//! src/services/gateway.rs
//!
//! Request-level operations: authorize against the registry, fetch the pooled
//! client for the destination, run the folder engine. HTTP handlers are thin
//! wrappers over these.

use std::{collections::BTreeMap, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    folders::{DEFAULT_DELIMITER, FolderDeletion, FolderEngine, RenameOutcome},
    guard::{Access, Guard, Identity, Operation},
    registry::Registry,
    store_client::{ClientPool, ConnectionTest, MAX_PRESIGN_TTL},
};
use crate::{
    errors::{GatewayError, GatewayResult},
    models::{
        destination::{
            ConnectionConfig, Destination, DestinationPatch, DestinationSummary, NewDestination,
            PublicDestination,
        },
        listing::{ListResult, ObjectHead},
    },
};

pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(3600);

/// `attachment; filename="..."` with embedded quotes escaped.
pub fn attachment_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename.replace('"', "\\\""))
}

fn require<'a>(field: &str, value: &'a str) -> GatewayResult<&'a str> {
    if value.is_empty() {
        return Err(GatewayError::validation(format!("{field} is required")));
    }
    Ok(value)
}

#[derive(Clone)]
pub struct Gateway {
    registry: Registry,
    guard: Guard,
    pool: ClientPool,
    presign_ttl: Duration,
}

impl Gateway {
    pub fn new(registry: Registry, pool: ClientPool, presign_ttl: Duration) -> Self {
        Self {
            guard: Guard::new(registry.clone()),
            registry,
            pool,
            presign_ttl,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    async fn open(
        &self,
        access: Access<'_>,
        bucket: Option<&str>,
        operation: Operation,
    ) -> GatewayResult<(Destination, FolderEngine)> {
        let destination = self.guard.authorize(access, bucket, operation).await?;
        let client = self.pool.client_for(&destination.connection())?;
        Ok((destination, FolderEngine::new(client)))
    }

    /// Buckets on the store, narrowed to the allow-list when one is set.
    pub async fn list_buckets(&self, access: Access<'_>) -> GatewayResult<Vec<String>> {
        let (destination, engine) = self.open(access, None, Operation::ListBuckets).await?;
        let buckets = engine.store().list_buckets().await?;
        Ok(buckets
            .into_iter()
            .filter(|b| destination.is_bucket_allowed(b))
            .collect())
    }

    pub async fn list_objects(
        &self,
        access: Access<'_>,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> GatewayResult<ListResult> {
        self.guard.screen_public(access, Operation::ListObjects).await?;
        let bucket = require("bucketName", bucket)?;
        let (destination, engine) = self
            .open(access, Some(bucket), Operation::ListObjects)
            .await?;
        let delimiter = delimiter.filter(|d| !d.is_empty()).unwrap_or(DEFAULT_DELIMITER);
        engine
            .list(
                bucket,
                prefix.unwrap_or_default(),
                delimiter,
                &destination.effective_metadata_columns(),
            )
            .await
    }

    pub async fn count_folder(
        &self,
        access: Access<'_>,
        bucket: &str,
        prefix: &str,
    ) -> GatewayResult<usize> {
        let bucket = require("bucketName", bucket)?;
        let (_, engine) = self
            .open(access, Some(bucket), Operation::CountFolder)
            .await?;
        engine.count_folder_contents(bucket, prefix).await
    }

    pub async fn create_folder(
        &self,
        access: Access<'_>,
        bucket: &str,
        prefix: &str,
    ) -> GatewayResult<()> {
        let bucket = require("bucketName", bucket)?;
        let (_, engine) = self.open(access, Some(bucket), Operation::Upload).await?;
        engine.create_folder(bucket, prefix).await
    }

    pub async fn delete_folder(
        &self,
        access: Access<'_>,
        bucket: &str,
        prefix: &str,
    ) -> GatewayResult<FolderDeletion> {
        let bucket = require("bucketName", bucket)?;
        let (_, engine) = self
            .open(access, Some(bucket), Operation::DeleteFolder)
            .await?;
        engine.delete_folder(bucket, prefix).await
    }

    pub async fn rename_folder(
        &self,
        access: Access<'_>,
        bucket: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> GatewayResult<usize> {
        let bucket = require("bucketName", bucket)?;
        let (_, engine) = self
            .open(access, Some(bucket), Operation::RenameFolder)
            .await?;
        engine.rename_folder(bucket, old_prefix, new_prefix).await
    }

    pub async fn reconcile_folder_rename(
        &self,
        access: Access<'_>,
        bucket: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> GatewayResult<RenameOutcome> {
        let bucket = require("bucketName", bucket)?;
        let (_, engine) = self
            .open(access, Some(bucket), Operation::RenameFolder)
            .await?;
        engine
            .reconcile_folder_rename(bucket, old_prefix, new_prefix)
            .await
    }

    pub async fn rename_object(
        &self,
        access: Access<'_>,
        bucket: &str,
        old_key: &str,
        new_key: &str,
    ) -> GatewayResult<()> {
        let bucket = require("bucketName", bucket)?;
        let (_, engine) = self
            .open(access, Some(bucket), Operation::RenameObject)
            .await?;
        engine.rename_object(bucket, old_key, new_key).await
    }

    pub async fn delete_object(
        &self,
        access: Access<'_>,
        bucket: &str,
        key: &str,
    ) -> GatewayResult<()> {
        let bucket = require("bucketName", bucket)?;
        let (_, engine) = self
            .open(access, Some(bucket), Operation::DeleteObject)
            .await?;
        engine.delete_object(bucket, key).await
    }

    /// Time-limited GET URL. `expires_in` overrides the configured lifetime
    /// and is capped at [`MAX_PRESIGN_TTL`]. With `filename` the response is
    /// served as an attachment under that name.
    pub async fn presign_download(
        &self,
        access: Access<'_>,
        bucket: &str,
        key: &str,
        expires_in: Option<Duration>,
        filename: Option<&str>,
    ) -> GatewayResult<String> {
        self.guard.screen_public(access, Operation::Download).await?;
        let bucket = require("bucketName", bucket)?;
        let key = require("Key", key)?;
        let ttl = self.download_ttl(expires_in)?;
        let (_, engine) = self.open(access, Some(bucket), Operation::Download).await?;
        let disposition = filename
            .filter(|f| !f.is_empty())
            .map(attachment_disposition);
        let url = engine
            .store()
            .presign_get(bucket, key, ttl, disposition.as_deref())
            .await?;
        Ok(url)
    }

    fn download_ttl(&self, expires_in: Option<Duration>) -> GatewayResult<Duration> {
        match expires_in {
            None => Ok(self.presign_ttl),
            Some(ttl) if ttl.is_zero() => Err(GatewayError::validation(
                "expiresIn must be at least one second",
            )),
            Some(ttl) => Ok(ttl.min(MAX_PRESIGN_TTL)),
        }
    }

    pub async fn presign_upload(
        &self,
        access: Access<'_>,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> GatewayResult<String> {
        let bucket = require("bucketName", bucket)?;
        if key.is_empty() || content_type.is_empty() {
            return Err(GatewayError::validation("Key and contentType required"));
        }
        let (_, engine) = self.open(access, Some(bucket), Operation::Upload).await?;
        let url = engine
            .store()
            .presign_put(bucket, key, content_type, self.presign_ttl)
            .await?;
        Ok(url)
    }

    pub async fn object_metadata(
        &self,
        access: Access<'_>,
        bucket: &str,
        key: &str,
    ) -> GatewayResult<ObjectHead> {
        let bucket = require("bucketName", bucket)?;
        let key = require("key", key)?;
        let (_, engine) = self
            .open(access, Some(bucket), Operation::ReadMetadata)
            .await?;
        engine.object_metadata(bucket, key).await
    }

    pub async fn update_metadata(
        &self,
        access: Access<'_>,
        bucket: &str,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> GatewayResult<()> {
        let bucket = require("bucketName", bucket)?;
        let key = require("key", key)?;
        let (_, engine) = self
            .open(access, Some(bucket), Operation::WriteMetadata)
            .await?;
        engine.update_metadata(bucket, key, metadata).await
    }

    pub async fn create_bucket(&self, access: Access<'_>, bucket: &str) -> GatewayResult<()> {
        let (_, engine) = self.open(access, None, Operation::CreateBucket).await?;
        engine.create_bucket(bucket).await
    }

    /// Rename a bucket, then point the destination's allow-list entry at the
    /// new name.
    pub async fn rename_bucket(
        &self,
        access: Access<'_>,
        old_bucket: &str,
        new_bucket: &str,
    ) -> GatewayResult<usize> {
        let (mut destination, engine) = self
            .open(access, Some(old_bucket), Operation::RenameBucket)
            .await?;
        let copied = engine.rename_bucket(old_bucket, new_bucket).await?;
        self.follow_bucket_rename(&mut destination, old_bucket, new_bucket)
            .await?;
        Ok(copied)
    }

    /// Finish an interrupted bucket rename. The allow-list may already name
    /// either bucket.
    pub async fn reconcile_bucket_rename(
        &self,
        access: Access<'_>,
        old_bucket: &str,
        new_bucket: &str,
    ) -> GatewayResult<RenameOutcome> {
        let (mut destination, engine) = self.open(access, None, Operation::RenameBucket).await?;
        if !destination.is_bucket_allowed(old_bucket) && !destination.is_bucket_allowed(new_bucket)
        {
            return Err(GatewayError::forbidden(
                "Access to this bucket is not allowed",
            ));
        }
        let outcome = engine.reconcile_bucket_rename(old_bucket, new_bucket).await?;
        self.follow_bucket_rename(&mut destination, old_bucket, new_bucket)
            .await?;
        Ok(outcome)
    }

    async fn follow_bucket_rename(
        &self,
        destination: &mut Destination,
        old_bucket: &str,
        new_bucket: &str,
    ) -> GatewayResult<()> {
        if destination.rename_allowed_bucket(old_bucket, new_bucket) {
            destination.updated_at = chrono::Utc::now();
            self.registry.save_destination(destination).await?;
            info!(id = %destination.id, old_bucket, new_bucket, "allow-list follows bucket rename");
        }
        Ok(())
    }

    // ---- registry administration ----

    pub async fn available_destinations(
        &self,
        identity: &Identity,
    ) -> GatewayResult<Vec<DestinationSummary>> {
        let destinations = self.guard.available_destinations(identity).await?;
        Ok(destinations.iter().map(Destination::summary).collect())
    }

    pub async fn public_destination(&self, slug: &str) -> GatewayResult<PublicDestination> {
        let slug = require("slug", slug)?;
        Ok(self.guard.public_destination(slug).await?.public_view())
    }

    pub async fn list_destinations(&self) -> GatewayResult<Vec<Destination>> {
        self.registry.list_destinations().await
    }

    pub async fn get_destination(&self, id: Uuid) -> GatewayResult<Destination> {
        self.registry.get_destination(id).await
    }

    pub async fn create_destination(&self, input: NewDestination) -> GatewayResult<Destination> {
        self.registry.create_destination(input).await
    }

    /// Update a destination; a changed connection drops the old pooled client.
    pub async fn update_destination(
        &self,
        id: Uuid,
        patch: DestinationPatch,
    ) -> GatewayResult<Destination> {
        let (before, after) = self.registry.update_destination(id, patch).await?;
        let old = before.connection();
        if old != after.connection() {
            self.pool.evict(&old);
        }
        Ok(after)
    }

    pub async fn delete_destination(&self, id: Uuid) -> GatewayResult<()> {
        let removed = self.registry.delete_destination(id).await?;
        self.pool.evict(&removed.connection());
        Ok(())
    }

    pub async fn test_connection(&self, config: &ConnectionConfig) -> ConnectionTest {
        let result = self.pool.test_connection(config).await;
        if !result.success {
            warn!(endpoint = %config.endpoint, message = %result.message, "connection test failed");
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        models::user::Role,
        services::{
            memory_store::{MemoryConnector, MemoryStore},
            registry::tests::{memory_registry, new_destination},
        },
    };
    use std::sync::Arc;

    pub(crate) const ENDPOINT: &str = "http://minio.local:9000";

    pub(crate) async fn gateway_with(store: Arc<MemoryStore>) -> (Gateway, Arc<MemoryConnector>) {
        let registry = memory_registry().await;
        let connector = Arc::new(MemoryConnector::with_store(ENDPOINT, store));
        let pool = ClientPool::new(connector.clone());
        (
            Gateway::new(registry, pool, DEFAULT_PRESIGN_TTL),
            connector,
        )
    }

    fn admin() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: "root".into(),
            role: Role::Admin,
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        store.add_bucket("docs");
        store.add_bucket("media");
        store.put("docs", "a/x.txt", &[0u8; 10]);
        store.put("docs", "a/b/y.txt", &[0u8; 5]);
        store
    }

    async fn destination(gateway: &Gateway, patch: DestinationPatch) -> Destination {
        let created = gateway
            .create_destination(new_destination("tenant"))
            .await
            .unwrap();
        gateway.update_destination(created.id, patch).await.unwrap()
    }

    #[test]
    fn disposition_escapes_quotes() {
        assert_eq!(
            attachment_disposition("report \"final\".pdf"),
            "attachment; filename=\"report \\\"final\\\".pdf\""
        );
    }

    #[tokio::test]
    async fn allow_listed_bucket_scenario() {
        let (gateway, _) = gateway_with(seeded_store()).await;
        let dest = destination(
            &gateway,
            DestinationPatch {
                bucket_names: Some(vec!["docs".into()]),
                ..Default::default()
            },
        )
        .await;
        let admin = admin();
        let access = Access::private(&admin, dest.id);

        assert!(matches!(
            gateway.list_objects(access, "media", None, None).await,
            Err(GatewayError::Forbidden(_))
        ));
        let listing = gateway
            .list_objects(access, "docs", Some("a/"), None)
            .await
            .unwrap();
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "x.txt");
        assert_eq!(listing.folders.len(), 1);
        assert_eq!(listing.folders[0].name, "b");

        assert_eq!(gateway.list_buckets(access).await.unwrap(), vec!["docs"]);
    }

    #[tokio::test]
    async fn bucket_rename_scenario_updates_allow_list() {
        let store = Arc::new(MemoryStore::default());
        store.add_bucket("old");
        store.put("old", "k1", b"one");
        store.put("old", "k2", b"second");
        let (gateway, _) = gateway_with(store).await;
        let dest = destination(
            &gateway,
            DestinationPatch {
                bucket_names: Some(vec!["old".into()]),
                ..Default::default()
            },
        )
        .await;
        let admin = admin();
        let access = Access::private(&admin, dest.id);

        assert_eq!(gateway.rename_bucket(access, "old", "new").await.unwrap(), 2);
        let listing = gateway.list_objects(access, "new", Some(""), None).await.unwrap();
        let sizes: Vec<(String, i64)> = listing
            .files
            .iter()
            .map(|f| (f.key.clone(), f.size))
            .collect();
        assert_eq!(sizes, vec![("k1".into(), 3), ("k2".into(), 6)]);

        let buckets = gateway.list_buckets(access).await.unwrap();
        assert_eq!(buckets, vec!["new"]);
        let stored = gateway.get_destination(dest.id).await.unwrap();
        assert_eq!(stored.bucket_names, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn metadata_columns_flow_into_listing() {
        let (gateway, _) = gateway_with(seeded_store()).await;
        let dest = destination(
            &gateway,
            DestinationPatch {
                metadata_columns: Some(vec!["Author".into(), " ".into()]),
                ..Default::default()
            },
        )
        .await;
        let admin = admin();
        let access = Access::private(&admin, dest.id);
        let metadata = BTreeMap::from([("Author".to_string(), "Zoë".to_string())]);
        gateway
            .update_metadata(access, "docs", "a/x.txt", &metadata)
            .await
            .unwrap();

        let listing = gateway
            .list_objects(access, "docs", Some("a/"), Some("/"))
            .await
            .unwrap();
        assert_eq!(listing.metadata_columns, Some(vec!["Author".to_string()]));
        assert_eq!(listing.files[0].metadata.as_ref().unwrap()["Author"], "Zoë");
        let head = gateway
            .object_metadata(access, "docs", "a/x.txt")
            .await
            .unwrap();
        assert_eq!(head.metadata, metadata);
    }

    #[tokio::test]
    async fn presigned_urls_carry_ttl_and_disposition() {
        let (gateway, _) = gateway_with(seeded_store()).await;
        let dest = destination(&gateway, DestinationPatch::default()).await;
        let admin = admin();
        let access = Access::private(&admin, dest.id);

        let url = gateway
            .presign_download(access, "docs", "a/x.txt", None, Some("x \"1\".txt"))
            .await
            .unwrap();
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("response-content-disposition=attachment"));

        let plain = gateway
            .presign_download(access, "docs", "a/x.txt", None, None)
            .await
            .unwrap();
        assert!(!plain.contains("response-content-disposition"));

        assert!(matches!(
            gateway.presign_upload(access, "docs", "k", "").await,
            Err(GatewayError::Validation(_))
        ));
        let upload = gateway
            .presign_upload(access, "docs", "k", "text/plain")
            .await
            .unwrap();
        assert!(upload.contains("content-type=text%2Fplain"));
    }

    #[tokio::test]
    async fn download_lifetime_can_be_chosen_per_call() {
        let (gateway, _) = gateway_with(seeded_store()).await;
        let dest = destination(&gateway, DestinationPatch::default()).await;
        let admin = admin();
        let access = Access::private(&admin, dest.id);

        let short = gateway
            .presign_download(access, "docs", "a/x.txt", Some(Duration::from_secs(60)), None)
            .await
            .unwrap();
        assert!(short.contains("X-Amz-Expires=60"));

        let capped = gateway
            .presign_download(
                access,
                "docs",
                "a/x.txt",
                Some(Duration::from_secs(30 * 86_400)),
                None,
            )
            .await
            .unwrap();
        assert!(capped.contains("X-Amz-Expires=604800"));

        assert!(matches!(
            gateway
                .presign_download(access, "docs", "a/x.txt", Some(Duration::ZERO), None)
                .await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn private_destinations_hide_validation_from_anonymous_callers() {
        let (gateway, _) = gateway_with(seeded_store()).await;
        destination(&gateway, DestinationPatch::default()).await;
        let public = Access::public("tenant");

        assert!(matches!(
            gateway.list_objects(public, "", None, None).await,
            Err(GatewayError::Forbidden(_))
        ));
        assert!(matches!(
            gateway.presign_download(public, "docs", "", None, None).await,
            Err(GatewayError::Forbidden(_))
        ));
        assert!(matches!(
            gateway.presign_download(public, "", "a/x.txt", None, None).await,
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn connection_changes_evict_pooled_client() {
        let (gateway, connector) = gateway_with(seeded_store()).await;
        let dest = destination(&gateway, DestinationPatch::default()).await;
        let admin = admin();
        let access = Access::private(&admin, dest.id);

        gateway.list_buckets(access).await.unwrap();
        gateway.list_buckets(access).await.unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(gateway.pool().len(), 1);

        // non-connection fields keep the client
        gateway
            .update_destination(
                dest.id,
                DestinationPatch {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(gateway.pool().len(), 1);

        gateway
            .update_destination(
                dest.id,
                DestinationPatch {
                    secret_access_key: Some("rotated".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(gateway.pool().is_empty());
        gateway.list_buckets(access).await.unwrap();
        assert_eq!(connector.connects(), 2);

        gateway.delete_destination(dest.id).await.unwrap();
        assert!(gateway.pool().is_empty());
    }

    #[tokio::test]
    async fn public_reads_only_on_opted_in_destinations() {
        let (gateway, _) = gateway_with(seeded_store()).await;
        let dest = destination(&gateway, DestinationPatch::default()).await;

        assert!(matches!(
            gateway.list_buckets(Access::public("tenant")).await,
            Err(GatewayError::Forbidden(_))
        ));
        gateway
            .update_destination(
                dest.id,
                DestinationPatch {
                    allow_public_access: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let listing = gateway
            .list_objects(Access::public("tenant"), "docs", Some("a/"), None)
            .await
            .unwrap();
        assert_eq!(listing.files.len(), 1);
        assert!(matches!(
            gateway
                .delete_object(Access::public("tenant"), "docs", "a/x.txt")
                .await,
            Err(GatewayError::Forbidden(_))
        ));
        let view = gateway.public_destination("tenant").await.unwrap();
        assert_eq!(view.slug, "tenant");
    }

    #[tokio::test]
    async fn test_connection_reports_instead_of_failing() {
        let (gateway, _) = gateway_with(seeded_store()).await;
        let good = new_destination("scratch").into_destination(chrono::Utc::now());
        let result = gateway.test_connection(&good.connection()).await;
        assert!(result.success);
        assert_eq!(result.buckets.unwrap(), vec!["docs", "media"]);

        let mut bad = good.connection();
        bad.endpoint = String::new();
        let result = gateway.test_connection(&bad).await;
        assert!(!result.success);
        assert!(gateway.pool().is_empty());
    }
}
