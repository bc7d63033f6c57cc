//! Authenticated browsing and mutation of a destination's buckets.
//!
//! Every handler takes the destination id (`id`) and, for bucket-scoped
//! calls, `bucketName` from the query string; request bodies are JSON.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{collections::BTreeMap, time::Duration};
use uuid::Uuid;

use crate::{
    errors::{AppError, GatewayError, GatewayResult},
    models::listing::{ListResult, ObjectHead},
    services::guard::{Access, Identity},
    state::{AppState, json_body},
};

/// Query parameters shared by the `/api/s3` endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Query {
    pub id: Option<String>,
    pub bucket_name: Option<String>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub key: Option<String>,
    pub filename: Option<String>,
    /// Download URL lifetime in seconds.
    pub expires_in: Option<u64>,
}

impl S3Query {
    fn destination_id(&self) -> GatewayResult<Uuid> {
        let raw = self
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::validation("id parameter is required"))?;
        Uuid::parse_str(raw).map_err(|_| GatewayError::not_found("Destination not found"))
    }

    /// Destination id plus a non-empty bucket name.
    fn target(&self) -> GatewayResult<(Uuid, &str)> {
        match (self.id.as_deref(), self.bucket_name.as_deref()) {
            (Some(id), Some(bucket)) if !id.is_empty() && !bucket.is_empty() => {
                Ok((self.destination_id()?, bucket))
            }
            _ => Err(GatewayError::validation(
                "id and bucketName parameters are required",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PrefixBody {
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFolderBody {
    pub old_prefix: String,
    pub new_prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameObjectBody {
    pub old_key: String,
    pub new_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlBody {
    pub key: String,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
pub struct MetadataBody {
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBucketBody {
    pub bucket_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBucketBody {
    pub old_bucket_name: String,
    pub new_bucket_name: String,
}

/// `GET /api/s3/buckets?id`
pub async fn list_buckets(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
) -> Result<Json<Value>, AppError> {
    let id = query.destination_id()?;
    let buckets = state
        .gateway
        .list_buckets(Access::private(&identity, id))
        .await?;
    Ok(Json(json!({ "buckets": buckets })))
}

/// `POST /api/s3/buckets/create?id`
pub async fn create_bucket(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<CreateBucketBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = query.destination_id()?;
    let body = json_body(payload)?;
    state
        .gateway
        .create_bucket(Access::private(&identity, id), &body.bucket_name)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Bucket created successfully"
    })))
}

/// `POST /api/s3/buckets/rename?id`
pub async fn rename_bucket(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<RenameBucketBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = query.destination_id()?;
    let body = json_body(payload)?;
    let copied = state
        .gateway
        .rename_bucket(
            Access::private(&identity, id),
            &body.old_bucket_name,
            &body.new_bucket_name,
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Bucket renamed successfully",
        "newBucketName": body.new_bucket_name,
        "copiedCount": copied
    })))
}

/// `POST /api/s3/buckets/reconcile?id`
pub async fn reconcile_bucket_rename(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<RenameBucketBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = query.destination_id()?;
    let body = json_body(payload)?;
    let outcome = state
        .gateway
        .reconcile_bucket_rename(
            Access::private(&identity, id),
            &body.old_bucket_name,
            &body.new_bucket_name,
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "copiedCount": outcome.copied,
        "deletedCount": outcome.deleted
    })))
}

/// `GET /api/s3/list?id&bucketName&prefix&delimiter`
pub async fn list_objects(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
) -> Result<Json<ListResult>, AppError> {
    let id = query.destination_id()?;
    let result = state
        .gateway
        .list_objects(
            Access::private(&identity, id),
            query.bucket_name.as_deref().unwrap_or_default(),
            query.prefix.as_deref(),
            query.delimiter.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

/// `GET /api/s3/folders/count?id&bucketName&prefix`
pub async fn count_folder(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    let count = state
        .gateway
        .count_folder(
            Access::private(&identity, id),
            bucket,
            query.prefix.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(json!({ "count": count })))
}

/// `POST /api/s3/folders/create?id&bucketName`
pub async fn create_folder(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<PrefixBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    let body = json_body(payload)?;
    state
        .gateway
        .create_folder(Access::private(&identity, id), bucket, &body.prefix)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /api/s3/folders/delete?id&bucketName`
pub async fn delete_folder(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<PrefixBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    let body = json_body(payload)?;
    let outcome = state
        .gateway
        .delete_folder(Access::private(&identity, id), bucket, &body.prefix)
        .await?;
    Ok(Json(json!({
        "success": true,
        "deletedCount": outcome.deleted_count,
        "markerRemoved": outcome.marker_removed
    })))
}

/// `POST /api/s3/folders/rename?id&bucketName`
pub async fn rename_folder(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<RenameFolderBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    let body = json_body(payload)?;
    let copied = state
        .gateway
        .rename_folder(
            Access::private(&identity, id),
            bucket,
            &body.old_prefix,
            &body.new_prefix,
        )
        .await?;
    Ok(Json(json!({ "success": true, "copiedCount": copied })))
}

/// `POST /api/s3/folders/reconcile?id&bucketName`
pub async fn reconcile_folder_rename(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<RenameFolderBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    let body = json_body(payload)?;
    let outcome = state
        .gateway
        .reconcile_folder_rename(
            Access::private(&identity, id),
            bucket,
            &body.old_prefix,
            &body.new_prefix,
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "copiedCount": outcome.copied,
        "deletedCount": outcome.deleted
    })))
}

/// `GET /api/s3/objects/{*key}?id&bucketName&filename&expiresIn`: presigned
/// download.
pub async fn download_url(
    State(state): State<AppState>,
    identity: Identity,
    Path(key): Path<String>,
    Query(query): Query<S3Query>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    let url = state
        .gateway
        .presign_download(
            Access::private(&identity, id),
            bucket,
            &key,
            query.expires_in.map(Duration::from_secs),
            query.filename.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "url": url })))
}

/// `DELETE /api/s3/objects/{*key}?id&bucketName`
pub async fn delete_object(
    State(state): State<AppState>,
    identity: Identity,
    Path(key): Path<String>,
    Query(query): Query<S3Query>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    state
        .gateway
        .delete_object(Access::private(&identity, id), bucket, &key)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /api/s3/objects/rename?id&bucketName`
///
/// Mounted on the `{*key}` route, so an object that is itself named `rename`
/// stays reachable through GET and DELETE.
pub async fn rename_object(
    State(state): State<AppState>,
    identity: Identity,
    Path(action): Path<String>,
    Query(query): Query<S3Query>,
    payload: Result<Json<RenameObjectBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    if action != "rename" {
        let message = format!("Unknown object action `{action}`");
        return Err(GatewayError::not_found(message).into());
    }
    let (id, bucket) = query.target()?;
    let body = json_body(payload)?;
    state
        .gateway
        .rename_object(
            Access::private(&identity, id),
            bucket,
            &body.old_key,
            &body.new_key,
        )
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /api/s3/upload-url?id&bucketName`
pub async fn upload_url(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<UploadUrlBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    let body = json_body(payload)?;
    let url = state
        .gateway
        .presign_upload(
            Access::private(&identity, id),
            bucket,
            &body.key,
            &body.content_type,
        )
        .await?;
    Ok(Json(json!({ "url": url })))
}

/// `GET /api/s3/metadata?id&bucketName&key`
pub async fn get_metadata(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
) -> Result<Json<ObjectHead>, AppError> {
    let (id, bucket) = query.target()?;
    let head = state
        .gateway
        .object_metadata(
            Access::private(&identity, id),
            bucket,
            query.key.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(head))
}

/// `PUT /api/s3/metadata?id&bucketName&key`
pub async fn put_metadata(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<S3Query>,
    payload: Result<Json<MetadataBody>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let (id, bucket) = query.target()?;
    let body = json_body(payload)?;
    state
        .gateway
        .update_metadata(
            Access::private(&identity, id),
            bucket,
            query.key.as_deref().unwrap_or_default(),
            &body.metadata,
        )
        .await?;
    Ok(Json(json!({ "success": true })))
}
