//! Anonymous read-only access to destinations that enabled public access.
//! The destination is addressed by slug instead of id.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::time::Duration;
use serde_json::{Value, json};

use crate::{
    errors::{AppError, GatewayError},
    models::{destination::PublicDestination, listing::ListResult},
    services::guard::Access,
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuery {
    pub slug: Option<String>,
    pub bucket_name: Option<String>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub filename: Option<String>,
    /// Download URL lifetime in seconds.
    pub expires_in: Option<u64>,
}

impl PublicQuery {
    fn slug(&self) -> Result<&str, GatewayError> {
        self.slug
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::validation("slug parameter is required"))
    }
}

/// `GET /api/public/destinations/{slug}`
pub async fn get_destination(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PublicDestination>, AppError> {
    Ok(Json(state.gateway.public_destination(&slug).await?))
}

/// `GET /api/public/s3/buckets?slug`
pub async fn list_buckets(
    State(state): State<AppState>,
    Query(query): Query<PublicQuery>,
) -> Result<Json<Value>, AppError> {
    let buckets = state
        .gateway
        .list_buckets(Access::public(query.slug()?))
        .await?;
    Ok(Json(json!({ "buckets": buckets })))
}

/// `GET /api/public/s3/list?slug&bucketName&prefix&delimiter`
pub async fn list_objects(
    State(state): State<AppState>,
    Query(query): Query<PublicQuery>,
) -> Result<Json<ListResult>, AppError> {
    let result = state
        .gateway
        .list_objects(
            Access::public(query.slug()?),
            query.bucket_name.as_deref().unwrap_or_default(),
            query.prefix.as_deref(),
            query.delimiter.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

/// `GET /api/public/s3/objects/{*key}?slug&bucketName&filename&expiresIn`
pub async fn download_url(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<PublicQuery>,
) -> Result<Json<Value>, AppError> {
    let url = state
        .gateway
        .presign_download(
            Access::public(query.slug()?),
            query.bucket_name.as_deref().unwrap_or_default(),
            &key,
            query.expires_in.map(Duration::from_secs),
            query.filename.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "url": url })))
}
