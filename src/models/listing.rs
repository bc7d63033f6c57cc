//! Listing results synthesized from flat object-store responses.
//!
//! None of these are persisted: they are rebuilt for every request, since the
//! object store itself is the source of truth.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A single object shown as a file.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FileItem {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "Size")]
    pub size: i64,

    #[serde(rename = "LastModified")]
    pub last_modified: DateTime<Utc>,

    /// Entity tag as reported by the store (quotes preserved).
    #[serde(rename = "ETag")]
    pub etag: String,

    #[serde(rename = "StorageClass")]
    pub storage_class: String,

    /// Key with the listed prefix and trailing slash removed.
    pub name: String,

    /// Decoded user metadata; present only when the destination declares
    /// metadata columns.
    #[serde(rename = "Metadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// A common prefix shown as a folder.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FolderItem {
    #[serde(rename = "Prefix")]
    pub prefix: String,
    pub name: String,
}

#[derive(Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub files: Vec<FileItem>,
    pub folders: Vec<FolderItem>,
    pub common_prefixes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_columns: Option<Vec<String>>,
}

/// Object metadata returned by a head request, user metadata decoded.
#[derive(Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectHead {
    pub metadata: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Strip `prefix` from the front of `key` and one trailing `/`.
pub fn display_name(key: &str, prefix: &str) -> String {
    let rest = key.strip_prefix(prefix).unwrap_or(key);
    rest.strip_suffix('/').unwrap_or(rest).to_string()
}
