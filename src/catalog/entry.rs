//! File entry types.
//!
//! A file entry is stored as an open JSON document. The mandatory fields are
//! exposed through [`FileEntry`]; every other attribute rides along in
//! [`FileEntry::attributes`] untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A metadata document as stored in the catalog.
pub type Document = serde_json::Map<String, Value>;

/// Checksums of the file content, keyed by algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// SHA-512 digest. Mandatory on every entry.
    pub sha512: String,
    /// Digests for any other algorithms.
    #[serde(flatten)]
    pub others: BTreeMap<String, String>,
}

/// Metadata describing one logical file and its replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Server-assigned identifier.
    pub uuid: String,
    /// Client-meaningful path-like name.
    pub logical_name: String,
    /// Replica locations, in insertion order.
    pub locations: Vec<String>,
    /// Size of the file in bytes.
    pub file_size: u64,
    /// Content checksums.
    pub checksum: Checksum,
    /// Domain-specific attributes (run, iceprod, processing_level, ...).
    #[serde(flatten)]
    pub attributes: Document,
}

impl FileEntry {
    /// Build an entry from a stored document.
    pub fn from_document(document: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(document))
    }

    /// Render the entry back into its document form.
    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        }
    }

    /// Check if the entry already lists a location.
    pub fn has_location(&self, location: &str) -> bool {
        self.locations.iter().any(|l| l == location)
    }
}

/// A stored file entry together with its current entity tag.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// The entry itself.
    pub entry: FileEntry,
    /// Opaque version marker, replaced on every mutation.
    pub etag: String,
}

impl FileRecord {
    /// Build a record from a stored document and its tag.
    pub fn from_document(document: Document, etag: impl Into<String>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            entry: FileEntry::from_document(document)?,
            etag: etag.into(),
        })
    }

    /// The entry uuid.
    pub fn uuid(&self) -> &str {
        &self.entry.uuid
    }

    /// The entry as a document.
    pub fn to_document(&self) -> Document {
        self.entry.to_document()
    }
}

/// Compute a fresh entity tag for a document.
///
/// A random nonce is mixed in, so a tag is never issued twice even when a
/// document returns to an earlier state.
pub fn new_entity_tag(uuid: &str, document: &Document) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uuid.as_bytes());
    hasher.update(serde_json::to_string(document).unwrap_or_default().as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Strip the weak prefix and quotes from a client-supplied entity tag.
pub fn normalize_entity_tag(raw: &str) -> &str {
    let tag = raw.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

/// Current time in the format used for `create_date` / `meta_modify_date`.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> Document {
        match json!({
            "uuid": "0d4c5b9e-1111-4c9a-9c1b-0123456789ab",
            "logical_name": "/data/exp/IceCube/2013/filtered/level2/Run00123456.i3.bz2",
            "locations": ["gsiftp://gridftp.icecube.wisc.edu/data/exp/Run00123456.i3.bz2"],
            "file_size": 1024,
            "checksum": {"sha512": "abc123", "md5": "d41d8cd9"},
            "run": {"run_number": 123456, "first_event": 1, "last_event": 500},
            "processing_level": "L2"
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_entry_from_document() {
        let entry = FileEntry::from_document(sample_document()).unwrap();
        assert_eq!(entry.file_size, 1024);
        assert_eq!(entry.checksum.sha512, "abc123");
        assert_eq!(entry.checksum.others.get("md5").unwrap(), "d41d8cd9");
        assert_eq!(entry.attributes["processing_level"], json!("L2"));
        assert_eq!(entry.attributes["run"]["run_number"], json!(123456));
    }

    #[test]
    fn test_entry_keeps_unknown_attributes() {
        let document = sample_document();
        let entry = FileEntry::from_document(document.clone()).unwrap();
        assert_eq!(entry.to_document(), document);
    }

    #[test]
    fn test_entry_missing_mandatory_field() {
        let mut document = sample_document();
        document.remove("checksum");
        assert!(FileEntry::from_document(document).is_err());
    }

    #[test]
    fn test_has_location() {
        let entry = FileEntry::from_document(sample_document()).unwrap();
        assert!(entry.has_location("gsiftp://gridftp.icecube.wisc.edu/data/exp/Run00123456.i3.bz2"));
        assert!(!entry.has_location("file:///tmp/other"));
    }

    #[test]
    fn test_entity_tags_never_repeat() {
        let document = sample_document();
        let first = new_entity_tag("id", &document);
        let second = new_entity_tag("id", &document);
        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_normalize_entity_tag() {
        assert_eq!(normalize_entity_tag("\"abc\""), "abc");
        assert_eq!(normalize_entity_tag("W/\"abc\""), "abc");
        assert_eq!(normalize_entity_tag(" abc "), "abc");
    }
}
