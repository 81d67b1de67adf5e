//! Response DTOs for the catalog API.
//!
//! Bodies follow HAL: every document carries a `_links` map with at least a
//! `self` relation.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::catalog::Document;

/// Content type of every API response body.
pub const HAL_CONTENT_TYPE: &str = "application/hal+json; charset=UTF-8";

/// A HAL link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Link {
    /// Target URL.
    pub href: String,
}

impl Link {
    /// Create a new link.
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

/// `_links` map keyed by relation name.
pub type Links = BTreeMap<String, Link>;

/// Build a `_links` map from `(rel, href)` pairs.
pub fn links<I, R, H>(pairs: I) -> Links
where
    I: IntoIterator<Item = (R, H)>,
    R: Into<String>,
    H: Into<String>,
{
    pairs
        .into_iter()
        .map(|(rel, href)| (rel.into(), Link::new(href)))
        .collect()
}

/// Shape of a file metadata document in requests and item responses.
///
/// Only the mandatory fields are listed; any other attribute is stored as
/// given and can be queried.
#[derive(Debug, Serialize, ToSchema)]
pub struct FileMetadata {
    /// Server-assigned identifier; never sent on create.
    pub uuid: Option<String>,
    /// Path-like name of the file.
    pub logical_name: String,
    /// Replica URLs, at least one.
    pub locations: Vec<String>,
    /// Size in bytes.
    pub file_size: u64,
    /// Digests keyed by algorithm; `sha512` is mandatory.
    pub checksum: BTreeMap<String, String>,
}

/// `GET /api`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiRootResponse {
    #[serde(rename = "_links")]
    #[schema(value_type = Object)]
    pub links: Links,
}

/// `GET /api/files`.
#[derive(Debug, Serialize, ToSchema)]
pub struct FileListResponse {
    #[serde(rename = "_links")]
    #[schema(value_type = Object)]
    pub links: Links,
    /// Matching entries, projected to the requested keys.
    #[schema(value_type = Vec<Object>)]
    pub files: Vec<Document>,
}

/// `GET /api/files/count`.
#[derive(Debug, Serialize, ToSchema)]
pub struct FileCountResponse {
    #[serde(rename = "_links")]
    #[schema(value_type = Object)]
    pub links: Links,
    /// Number of matching entries.
    pub files: usize,
}

/// `POST /api/files`: points at the created or extended entry.
#[derive(Debug, Serialize, ToSchema)]
pub struct FileLinkResponse {
    #[serde(rename = "_links")]
    #[schema(value_type = Object)]
    pub links: Links,
    /// URL of the file entry.
    pub file: String,
}

/// Item body: the stored document plus `_links` and `_etag`.
pub fn file_document(mut document: Document, links: Links, etag: &str) -> Value {
    let links = serde_json::to_value(links).unwrap_or(Value::Null);
    document.insert("_links".to_string(), links);
    document.insert("_etag".to_string(), Value::String(etag.to_string()));
    Value::Object(document)
}
