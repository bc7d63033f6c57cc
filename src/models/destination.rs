//! Represents a destination, one tenant's connection to an S3-compatible store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::fmt;
use uuid::Uuid;

use crate::errors::{GatewayError, GatewayResult};

pub const DEFAULT_REGION: &str = "us-east-1";

/// A registered object-store destination.
///
/// Destinations carry the connection settings and credentials for one store,
/// plus the access lists the authorization guard evaluates on every request.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Immutable identifier assigned on creation.
    pub id: Uuid,

    /// Human-readable display name.
    pub name: String,

    /// Globally unique, URL-safe handle used for public access.
    pub slug: String,

    /// Store endpoint URL (e.g. "https://s3.example.com").
    pub endpoint: String,

    /// Signing region.
    pub region: String,

    pub access_key_id: String,

    pub secret_access_key: String,

    /// Address buckets as `endpoint/bucket` rather than `bucket.endpoint`.
    pub force_path_style: bool,

    /// Buckets callers may touch. Empty means every bucket.
    pub bucket_names: Vec<String>,

    /// Whether the slug-based read-only surface is enabled.
    pub allow_public_access: bool,

    /// Non-admin users allowed to use this destination.
    pub allowed_user_ids: Vec<Uuid>,

    /// Metadata keys surfaced as table columns in listings.
    pub metadata_columns: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("slug", &self.slug)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("force_path_style", &self.force_path_style)
            .field("bucket_names", &self.bucket_names)
            .field("allow_public_access", &self.allow_public_access)
            .field("allowed_user_ids", &self.allowed_user_ids)
            .field("metadata_columns", &self.metadata_columns)
            .finish()
    }
}

impl Destination {
    /// Connection subset used to build (and key) store clients.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            force_path_style: self.force_path_style,
        }
    }

    /// An empty allow-list admits every bucket.
    pub fn is_bucket_allowed(&self, bucket: &str) -> bool {
        self.bucket_names.is_empty() || self.bucket_names.iter().any(|b| b == bucket)
    }

    /// Configured metadata columns with blank entries dropped.
    pub fn effective_metadata_columns(&self) -> Vec<String> {
        self.metadata_columns
            .iter()
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .collect()
    }

    /// Replace `old` with `new` in the bucket allow-list. Returns whether
    /// anything changed.
    pub fn rename_allowed_bucket(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for name in self.bucket_names.iter_mut() {
            if name == old {
                *name = new.to_string();
                changed = true;
            }
        }
        changed
    }

    pub fn summary(&self) -> DestinationSummary {
        DestinationSummary {
            id: self.id,
            name: self.name.clone(),
            slug: self.slug.clone(),
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            force_path_style: self.force_path_style,
            bucket_names: self.bucket_names.clone(),
            allow_public_access: self.allow_public_access,
            allowed_user_ids: self.allowed_user_ids.clone(),
            metadata_columns: self.metadata_columns.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn public_view(&self) -> PublicDestination {
        PublicDestination {
            id: self.id,
            name: self.name.clone(),
            slug: self.slug.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            bucket_names: self.bucket_names.clone(),
            force_path_style: self.force_path_style,
            allow_public_access: self.allow_public_access,
        }
    }
}

/// Destination without its credential pair, for non-admin callers.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DestinationSummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub endpoint: String,
    pub region: String,
    pub force_path_style: bool,
    pub bucket_names: Vec<String>,
    pub allow_public_access: bool,
    pub allowed_user_ids: Vec<Uuid>,
    pub metadata_columns: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What an anonymous caller may learn about a public destination.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicDestination {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub region: String,
    pub endpoint: String,
    pub bucket_names: Vec<String>,
    pub force_path_style: bool,
    pub allow_public_access: bool,
}

/// Settings a store client is built from. Two destinations with equal
/// configs share one pooled client.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("force_path_style", &self.force_path_style)
            .finish_non_exhaustive()
    }
}

impl ConnectionConfig {
    /// Stable hash over every field; any byte of difference yields a new key.
    pub fn fingerprint(&self) -> String {
        let mut ctx = md5::Context::new();
        for part in [
            self.endpoint.as_str(),
            self.region.as_str(),
            self.access_key_id.as_str(),
            self.secret_access_key.as_str(),
        ] {
            ctx.consume((part.len() as u64).to_le_bytes());
            ctx.consume(part.as_bytes());
        }
        ctx.consume([self.force_path_style as u8]);
        format!("{:x}", ctx.compute())
    }

    pub fn region_or_default(&self) -> &str {
        if self.region.trim().is_empty() {
            DEFAULT_REGION
        } else {
            &self.region
        }
    }
}

fn default_true() -> bool {
    true
}

/// Payload for creating a destination.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewDestination {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub region: Option<String>,
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub bucket_names: Vec<String>,
    #[serde(default)]
    pub force_path_style: Option<bool>,
    #[serde(default)]
    pub allow_public_access: Option<bool>,
    #[serde(default)]
    pub allowed_user_ids: Vec<Uuid>,
    #[serde(default)]
    pub metadata_columns: Vec<String>,
}

impl NewDestination {
    pub fn validate(&self) -> GatewayResult<()> {
        require_non_empty("name", &self.name)?;
        validate_slug(&self.slug)?;
        require_non_empty("endpoint", &self.endpoint)?;
        require_non_empty("accessKeyId", &self.access_key_id)?;
        require_non_empty("secretAccessKey", &self.secret_access_key)?;
        require_all_non_empty("bucketNames", &self.bucket_names)?;
        require_all_non_empty("metadataColumns", &self.metadata_columns)
    }

    pub fn into_destination(self, now: DateTime<Utc>) -> Destination {
        Destination {
            id: Uuid::new_v4(),
            name: self.name,
            slug: self.slug,
            endpoint: self.endpoint,
            region: self
                .region
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id: self.access_key_id,
            secret_access_key: self.secret_access_key,
            force_path_style: self.force_path_style.unwrap_or(true),
            bucket_names: self.bucket_names,
            allow_public_access: self.allow_public_access.unwrap_or(false),
            allowed_user_ids: self.allowed_user_ids,
            metadata_columns: self.metadata_columns,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a destination; absent fields keep their value.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DestinationPatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket_names: Option<Vec<String>>,
    pub force_path_style: Option<bool>,
    pub allow_public_access: Option<bool>,
    pub allowed_user_ids: Option<Vec<Uuid>>,
    pub metadata_columns: Option<Vec<String>>,
}

impl DestinationPatch {
    pub fn validate(&self) -> GatewayResult<()> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
        }
        if let Some(slug) = &self.slug {
            validate_slug(slug)?;
        }
        for (field, value) in [
            ("endpoint", &self.endpoint),
            ("accessKeyId", &self.access_key_id),
            ("secretAccessKey", &self.secret_access_key),
        ] {
            if let Some(value) = value {
                require_non_empty(field, value)?;
            }
        }
        if let Some(names) = &self.bucket_names {
            require_all_non_empty("bucketNames", names)?;
        }
        if let Some(columns) = &self.metadata_columns {
            require_all_non_empty("metadataColumns", columns)?;
        }
        Ok(())
    }

    /// Merge into `target`. The id and creation time are never touched.
    pub fn apply(self, target: &mut Destination, now: DateTime<Utc>) {
        if let Some(v) = self.name {
            target.name = v;
        }
        if let Some(v) = self.slug {
            target.slug = v;
        }
        if let Some(v) = self.region {
            target.region = v;
        }
        if let Some(v) = self.endpoint {
            target.endpoint = v;
        }
        if let Some(v) = self.access_key_id {
            target.access_key_id = v;
        }
        if let Some(v) = self.secret_access_key {
            target.secret_access_key = v;
        }
        if let Some(v) = self.bucket_names {
            target.bucket_names = v;
        }
        if let Some(v) = self.force_path_style {
            target.force_path_style = v;
        }
        if let Some(v) = self.allow_public_access {
            target.allow_public_access = v;
        }
        if let Some(v) = self.allowed_user_ids {
            target.allowed_user_ids = v;
        }
        if let Some(v) = self.metadata_columns {
            target.metadata_columns = v;
        }
        target.updated_at = now;
    }
}

/// Row shape of the `destinations` table; list columns are JSON text.
#[derive(FromRow, Debug)]
pub struct DestinationRow {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub force_path_style: bool,
    pub bucket_names: Json<Vec<String>>,
    pub allow_public_access: bool,
    pub allowed_user_ids: Json<Vec<Uuid>>,
    pub metadata_columns: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DestinationRow> for Destination {
    fn from(row: DestinationRow) -> Self {
        Destination {
            id: row.id,
            name: row.name,
            slug: row.slug,
            endpoint: row.endpoint,
            region: row.region,
            access_key_id: row.access_key_id,
            secret_access_key: row.secret_access_key,
            force_path_style: row.force_path_style,
            bucket_names: row.bucket_names.0,
            allow_public_access: row.allow_public_access,
            allowed_user_ids: row.allowed_user_ids.0,
            metadata_columns: row.metadata_columns.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Slugs are lowercase alphanumeric runs joined by single `-` or `_`.
pub fn validate_slug(slug: &str) -> GatewayResult<()> {
    let valid = !slug.is_empty()
        && slug
            .split(['-', '_'])
            .all(|run| !run.is_empty() && run.chars().all(|c| matches!(c, 'a'..='z' | '0'..='9')));
    if valid {
        Ok(())
    } else {
        Err(GatewayError::validation(
            "Slug must contain only lowercase letters, numbers, hyphens and underscores. \
             No leading or trailing hyphens.",
        ))
    }
}

fn require_non_empty(field: &str, value: &str) -> GatewayResult<()> {
    if value.is_empty() {
        return Err(GatewayError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_all_non_empty(field: &str, values: &[String]) -> GatewayResult<()> {
    if values.iter().any(String::is_empty) {
        return Err(GatewayError::validation(format!(
            "{field} must not contain empty entries"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Destination {
        NewDestination {
            name: "Docs".into(),
            slug: "docs".into(),
            region: None,
            endpoint: "http://localhost:9000".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            bucket_names: vec!["docs".into()],
            force_path_style: None,
            allow_public_access: None,
            allowed_user_ids: vec![],
            metadata_columns: vec!["author".into(), " ".into()],
        }
        .into_destination(Utc::now())
    }

    #[test]
    fn slug_rules() {
        assert!(validate_slug("team-docs_2").is_ok());
        assert!(validate_slug("docs").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("-docs").is_err());
        assert!(validate_slug("docs-").is_err());
        assert!(validate_slug("Docs").is_err());
        assert!(validate_slug("a--b").is_err());
        assert!(validate_slug("a b").is_err());
    }

    #[test]
    fn new_destination_defaults() {
        let dest = sample();
        assert_eq!(dest.region, DEFAULT_REGION);
        assert!(dest.force_path_style);
        assert!(!dest.allow_public_access);
        assert_eq!(dest.effective_metadata_columns(), vec!["author".to_string()]);
    }

    #[test]
    fn bucket_allow_list() {
        let mut dest = sample();
        assert!(dest.is_bucket_allowed("docs"));
        assert!(!dest.is_bucket_allowed("media"));
        dest.bucket_names.clear();
        assert!(dest.is_bucket_allowed("media"));
    }

    #[test]
    fn patch_merges_and_keeps_identity() {
        let mut dest = sample();
        let id = dest.id;
        let created = dest.created_at;
        let later = created + chrono::Duration::seconds(5);
        DestinationPatch {
            name: Some("Renamed".into()),
            allow_public_access: Some(true),
            ..Default::default()
        }
        .apply(&mut dest, later);
        assert_eq!(dest.id, id);
        assert_eq!(dest.created_at, created);
        assert_eq!(dest.updated_at, later);
        assert_eq!(dest.name, "Renamed");
        assert_eq!(dest.slug, "docs");
        assert!(dest.allow_public_access);
    }

    #[test]
    fn fingerprint_tracks_every_field() {
        let base = sample().connection();
        let mut other = base.clone();
        assert_eq!(base.fingerprint(), other.fingerprint());
        other.force_path_style = false;
        assert_ne!(base.fingerprint(), other.fingerprint());
        let mut other = base.clone();
        other.secret_access_key.push('x');
        assert_ne!(base.fingerprint(), other.fingerprint());
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?} {:?}", sample(), sample().connection());
        assert!(!rendered.contains("\"sk\""));
    }
}
