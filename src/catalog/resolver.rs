//! Conflict resolution for catalog writes.
//!
//! Every mutation runs its validation and conflict checks before touching
//! the store, so a rejected request leaves no trace. Stale entity tags are
//! reported to the caller and never retried here.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::entry::{normalize_entity_tag, timestamp_now, Document, FileRecord};
use super::filter::Filter;
use super::merge::{merge_locations, merge_patch};
use super::schema::{Mode, SchemaValidator, ValidationError};
use crate::db::{document_locations, SharedStore};
use crate::{CatalogError, Result};

/// Body fields owned by the HAL representation, never stored.
pub const RESERVED_FIELDS: [&str; 2] = ["_links", "_etag"];

/// Result of `POST /api/files`.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new entry was stored.
    Created(FileRecord),
    /// The checksum matched an existing entry; new locations were merged in.
    ReplicaAdded(FileRecord),
    /// The checksum matched and every location was already known.
    AlreadyPresent(FileRecord),
}

impl CreateOutcome {
    /// The entry the request ended up at.
    pub fn record(&self) -> &FileRecord {
        match self {
            CreateOutcome::Created(r)
            | CreateOutcome::ReplicaAdded(r)
            | CreateOutcome::AlreadyPresent(r) => r,
        }
    }

    /// Whether a new resource was created.
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Split the reserved HAL fields off a request body, returning the body and
/// the `_etag` it carried.
pub fn strip_reserved(body: Value) -> (Value, Option<String>) {
    match body {
        Value::Object(mut map) => {
            let etag = map
                .remove("_etag")
                .and_then(|v| v.as_str().map(str::to_string));
            for field in RESERVED_FIELDS {
                map.remove(field);
            }
            (Value::Object(map), etag)
        }
        other => (other, None),
    }
}

fn text_field<'a>(document: &'a Document, path: &str) -> Option<&'a str> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    current.as_str()
}

fn stamp_modified(document: &mut Document) {
    document.insert(
        "meta_modify_date".to_string(),
        Value::String(timestamp_now()),
    );
}

/// Applies creation, replacement, patch and delete requests to the store.
#[derive(Clone)]
pub struct ConflictResolver {
    store: SharedStore,
    validator: SchemaValidator,
}

impl ConflictResolver {
    /// Create a resolver over a store.
    pub fn new(store: SharedStore, validator: SchemaValidator) -> Self {
        Self { store, validator }
    }

    /// Fetch an entry.
    pub async fn get(&self, uuid: &str) -> Result<FileRecord> {
        self.store
            .get(uuid)
            .await?
            .ok_or_else(|| CatalogError::NotFound(uuid.to_string()))
    }

    /// Create an entry, or merge its locations into the entry with the same
    /// checksum.
    pub async fn create(&self, body: Value) -> Result<CreateOutcome> {
        let (body, _) = strip_reserved(body);
        let mut document = self.validator.validate(body, Mode::Create)?.into_inner();

        let sha512 = text_field(&document, "checksum.sha512")
            .unwrap_or_default()
            .to_string();
        if let Some(existing) = self
            .store
            .find_one(&Filter::eq("checksum.sha512", sha512))
            .await?
        {
            debug!(uuid = %existing.uuid(), "checksum matches, treating as replica");
            return self.add_replica(existing, &document_locations(&document)).await;
        }

        let logical_name = text_field(&document, "logical_name")
            .unwrap_or_default()
            .to_string();
        if let Some(existing) = self
            .store
            .find_one(&Filter::eq("logical_name", logical_name.as_str()))
            .await?
        {
            warn!(
                logical_name = %logical_name,
                existing = %existing.uuid(),
                "create rejected: logical_name exists with a different checksum"
            );
            return Err(CatalogError::conflict(
                format!("logical_name `{logical_name}` already exists with a different checksum"),
                existing.uuid(),
            ));
        }

        self.ensure_locations_free(&document_locations(&document), None)
            .await?;

        if !document.contains_key("create_date") {
            document.insert("create_date".to_string(), Value::String(timestamp_now()));
        }
        stamp_modified(&mut document);

        let record = self.store.insert(document).await?;
        info!(uuid = %record.uuid(), "created file entry");
        Ok(CreateOutcome::Created(record))
    }

    async fn add_replica(&self, existing: FileRecord, incoming: &[String]) -> Result<CreateOutcome> {
        let (merged, added) = merge_locations(&existing.entry.locations, incoming);
        if added == 0 {
            return Ok(CreateOutcome::AlreadyPresent(existing));
        }
        self.ensure_locations_free(&merged, Some(existing.uuid()))
            .await?;

        let record = self.write_locations(&existing, merged).await?;
        info!(uuid = %record.uuid(), added, "added replica locations");
        Ok(CreateOutcome::ReplicaAdded(record))
    }

    /// Append locations to an entry.
    ///
    /// Locations already on the entry are ignored; a location owned by a
    /// different entry is a conflict.
    pub async fn add_locations(&self, uuid: &str, locations: &[String]) -> Result<FileRecord> {
        let existing = self.get(uuid).await?;
        let (merged, added) = merge_locations(&existing.entry.locations, locations);
        self.ensure_locations_free(&merged, Some(uuid)).await?;
        if added == 0 {
            return Ok(existing);
        }
        let record = self.write_locations(&existing, merged).await?;
        info!(uuid = %uuid, added, "added locations");
        Ok(record)
    }

    async fn write_locations(&self, existing: &FileRecord, locations: Vec<String>) -> Result<FileRecord> {
        let mut partial = Document::new();
        partial.insert(
            "locations".to_string(),
            Value::Array(locations.into_iter().map(Value::String).collect()),
        );
        stamp_modified(&mut partial);
        Ok(self
            .store
            .patch(existing.uuid(), &existing.etag, partial)
            .await?)
    }

    /// Replace an entry wholesale.
    ///
    /// `if_match` is the entity tag from the `If-Match` header; the body's
    /// `_etag` is used when the header is absent.
    pub async fn replace(&self, uuid: &str, if_match: Option<&str>, body: Value) -> Result<FileRecord> {
        let (mut body, body_tag) = strip_reserved(body);
        let current = self.get(uuid).await?;
        let tag = required_tag(if_match, body_tag, &current)?;

        if let Value::Object(map) = &mut body {
            map.entry("uuid".to_string())
                .or_insert_with(|| Value::String(uuid.to_string()));
        }
        let mut document = self.validator.validate(body, Mode::Update(uuid))?.into_inner();

        self.check_tag(&current, &tag)?;
        self.ensure_unique(&document, uuid).await?;

        stamp_modified(&mut document);
        let record = self.store.replace(uuid, &tag, document).await?;
        info!(uuid = %uuid, "replaced file entry");
        Ok(record)
    }

    /// Merge a partial document into an entry.
    pub async fn patch(&self, uuid: &str, if_match: Option<&str>, body: Value) -> Result<FileRecord> {
        let (body, body_tag) = strip_reserved(body);
        let current = self.get(uuid).await?;
        let tag = required_tag(if_match, body_tag, &current)?;

        let mut partial = self.validator.validate(body, Mode::Patch(uuid))?.into_inner();
        partial.remove("uuid");

        let mut merged = current.to_document();
        merge_patch(&mut merged, &partial);
        self.validator
            .validate(Value::Object(merged.clone()), Mode::Update(uuid))?;

        self.check_tag(&current, &tag)?;
        self.ensure_unique(&merged, uuid).await?;

        stamp_modified(&mut partial);
        let record = self.store.patch(uuid, &tag, partial).await?;
        info!(uuid = %uuid, "patched file entry");
        Ok(record)
    }

    /// Remove an entry.
    pub async fn delete(&self, uuid: &str) -> Result<()> {
        self.store.delete(uuid).await?;
        info!(uuid = %uuid, "deleted file entry");
        Ok(())
    }

    fn check_tag(&self, current: &FileRecord, tag: &str) -> Result<()> {
        if current.etag != tag {
            warn!(uuid = %current.uuid(), "stale entity tag");
            return Err(CatalogError::StaleEntityTag {
                uuid: current.uuid().to_string(),
            });
        }
        Ok(())
    }

    /// `logical_name` and every location must not belong to another entry.
    async fn ensure_unique(&self, document: &Document, uuid: &str) -> Result<()> {
        if let Some(name) = text_field(document, "logical_name") {
            if let Some(other) = self
                .store
                .find_one(&Filter::eq("logical_name", name))
                .await?
            {
                if other.uuid() != uuid {
                    warn!(logical_name = %name, existing = %other.uuid(), "logical_name taken");
                    return Err(CatalogError::conflict(
                        format!("logical_name `{name}` already belongs to another file"),
                        other.uuid(),
                    ));
                }
            }
        }
        self.ensure_locations_free(&document_locations(document), Some(uuid))
            .await
    }

    async fn ensure_locations_free(&self, locations: &[String], owner: Option<&str>) -> Result<()> {
        for location in locations {
            if let Some(other) = self
                .store
                .find_one(&Filter::eq("locations", location.as_str()))
                .await?
            {
                if Some(other.uuid()) != owner {
                    warn!(location = %location, existing = %other.uuid(), "location taken");
                    return Err(CatalogError::conflict(
                        format!("location `{location}` already belongs to another file"),
                        other.uuid(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The entity tag a write is conditioned on. `*` stands for whatever
/// version is current.
fn required_tag(
    if_match: Option<&str>,
    body_tag: Option<String>,
    current: &FileRecord,
) -> Result<String> {
    let raw = if_match
        .map(str::to_string)
        .or(body_tag)
        .filter(|t| !normalize_entity_tag(t).is_empty())
        .ok_or_else(|| {
            ValidationError::single("If-Match", "an entity tag is required to modify a file")
        })?;
    match normalize_entity_tag(&raw) {
        "*" => Ok(current.etag.clone()),
        tag => Ok(tag.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(Arc::new(MemoryStore::new()), SchemaValidator::default())
    }

    fn body(name: &str, sha: &str, locations: &[&str]) -> Value {
        json!({
            "logical_name": name,
            "locations": locations,
            "file_size": 100,
            "checksum": {"sha512": sha},
            "run": {"run_number": 1, "first_event": 1, "last_event": 10}
        })
    }

    async fn created(resolver: &ConflictResolver, value: Value) -> FileRecord {
        match resolver.create(value).await.unwrap() {
            CreateOutcome::Created(record) => record,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn test_strip_reserved() {
        let (value, tag) = strip_reserved(json!({"a": 1, "_links": {}, "_etag": "t"}));
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(tag.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_required_tag() {
        let resolver = resolver();
        let current = created(&resolver, body("/a", "s1", &["x://a"])).await;

        assert_eq!(required_tag(Some("\"abc\""), None, &current).unwrap(), "abc");
        assert_eq!(
            required_tag(None, Some("def".to_string()), &current).unwrap(),
            "def"
        );
        assert_eq!(
            required_tag(Some("abc"), Some("def".to_string()), &current).unwrap(),
            "abc"
        );
        assert_eq!(required_tag(Some("*"), None, &current).unwrap(), current.etag);
        assert!(matches!(
            required_tag(None, None, &current),
            Err(CatalogError::Validation(_))
        ));
        assert!(required_tag(Some("\"\""), None, &current).is_err());
    }

    #[tokio::test]
    async fn test_wildcard_tag_matches_current_version() {
        let resolver = resolver();
        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;

        let patched = resolver
            .patch(record.uuid(), Some("*"), json!({"processing_level": "L2"}))
            .await
            .unwrap();
        let replaced = resolver
            .replace(record.uuid(), Some("*"), body("/a", "s1", &["x://a"]))
            .await
            .unwrap();
        assert_ne!(replaced.etag, patched.etag);
        assert!(!replaced.entry.attributes.contains_key("processing_level"));
    }

    #[tokio::test]
    async fn test_create_sets_dates() {
        let resolver = resolver();
        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;
        assert!(record.entry.attributes.contains_key("create_date"));
        assert!(record.entry.attributes.contains_key("meta_modify_date"));
    }

    #[tokio::test]
    async fn test_create_validation_is_side_effect_free() {
        let resolver = resolver();
        let err = resolver
            .create(json!({"logical_name": "/a", "locations": ["x://a"], "file_size": 1, "checksum": {}}))
            .await
            .unwrap_err();
        match err {
            CatalogError::Validation(v) => assert_eq!(v.fields(), vec!["checksum.sha512"]),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(resolver.store.count(&Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replica_merge_is_idempotent() {
        let resolver = resolver();
        let first = created(&resolver, body("/a", "s1", &["x://a"])).await;

        let outcome = resolver
            .create(body("/a", "s1", &["x://a", "x://b"]))
            .await
            .unwrap();
        let CreateOutcome::ReplicaAdded(second) = outcome else {
            panic!("expected ReplicaAdded");
        };
        assert_eq!(second.uuid(), first.uuid());
        assert_eq!(second.entry.locations, vec!["x://a", "x://b"]);

        let outcome = resolver
            .create(body("/a", "s1", &["x://b", "x://a"]))
            .await
            .unwrap();
        assert!(matches!(outcome, CreateOutcome::AlreadyPresent(_)));
        assert_eq!(outcome.record().etag, second.etag);
        assert_eq!(resolver.store.count(&Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_name_different_checksum_conflicts() {
        let resolver = resolver();
        let first = created(&resolver, body("/a", "s1", &["x://a"])).await;
        let err = resolver
            .create(body("/a", "s2", &["x://b"]))
            .await
            .unwrap_err();
        match err {
            CatalogError::Conflict { existing, .. } => {
                assert_eq!(existing.as_deref(), Some(first.uuid()))
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_location_owned_by_other_file_conflicts() {
        let resolver = resolver();
        let first = created(&resolver, body("/a", "s1", &["x://a"])).await;
        let err = resolver
            .create(body("/b", "s2", &["x://a"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Conflict { existing: Some(ref u), .. } if u == first.uuid()
        ));
    }

    #[tokio::test]
    async fn test_repeated_locations_rejected_on_every_write() {
        let resolver = resolver();
        let err = resolver
            .create(body("/a", "s1", &["x://a", "x://a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(ref v) if v.fields() == vec!["locations[1]"]));
        assert_eq!(resolver.store.count(&Filter::All).await.unwrap(), 0);

        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;
        let err = resolver
            .replace(record.uuid(), Some(&record.etag), body("/a", "s1", &["x://a", "x://a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let err = resolver
            .patch(record.uuid(), Some(&record.etag), json!({"locations": ["x://b", "x://b"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert_eq!(resolver.get(record.uuid()).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_replace_requires_tag_and_existence() {
        let resolver = resolver();
        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;

        let err = resolver
            .replace(record.uuid(), None, body("/a", "s1", &["x://a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let err = resolver
            .replace("missing", Some("t"), body("/a", "s1", &["x://a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replace_clears_absent_fields() {
        let resolver = resolver();
        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;

        let replaced = resolver
            .replace(
                record.uuid(),
                Some(&record.etag),
                json!({
                    "logical_name": "/a",
                    "locations": ["x://a"],
                    "file_size": 5,
                    "checksum": {"sha512": "s1"}
                }),
            )
            .await
            .unwrap();
        assert_eq!(replaced.entry.file_size, 5);
        assert!(!replaced.entry.attributes.contains_key("run"));
        assert_ne!(replaced.etag, record.etag);

        let err = resolver
            .replace(record.uuid(), Some(&record.etag), body("/a", "s1", &["x://a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::StaleEntityTag { .. }));
    }

    #[tokio::test]
    async fn test_replace_rejects_taken_logical_name() {
        let resolver = resolver();
        let a = created(&resolver, body("/a", "s1", &["x://a"])).await;
        let b = created(&resolver, body("/b", "s2", &["x://b"])).await;

        let err = resolver
            .replace(b.uuid(), Some(&b.etag), body("/a", "s2", &["x://b"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Conflict { existing: Some(ref u), .. } if u == a.uuid()
        ));
    }

    #[tokio::test]
    async fn test_replace_rejects_foreign_uuid() {
        let resolver = resolver();
        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;
        let mut replacement = body("/a", "s1", &["x://a"]);
        replacement["uuid"] = json!("someone-else");
        let err = resolver
            .replace(record.uuid(), Some(&record.etag), replacement)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_patch_null_removes_and_keeps_others() {
        let resolver = resolver();
        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;

        let patched = resolver
            .patch(record.uuid(), Some(&record.etag), json!({"run": null}))
            .await
            .unwrap();
        assert!(!patched.entry.attributes.contains_key("run"));

        let patched = resolver
            .patch(
                record.uuid(),
                None,
                json!({"processing_level": "L2", "_etag": patched.etag}),
            )
            .await
            .unwrap();
        assert!(!patched.entry.attributes.contains_key("run"));
        assert_eq!(patched.entry.attributes["processing_level"], json!("L2"));
        assert_eq!(patched.entry.logical_name, "/a");
        assert_eq!(patched.entry.file_size, 100);
    }

    #[tokio::test]
    async fn test_patch_cannot_remove_mandatory_field() {
        let resolver = resolver();
        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;
        let err = resolver
            .patch(record.uuid(), Some(&record.etag), json!({"locations": null}))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_locations() {
        let resolver = resolver();
        let a = created(&resolver, body("/a", "s1", &["x://a"])).await;
        created(&resolver, body("/b", "s2", &["x://b"])).await;

        let updated = resolver
            .add_locations(a.uuid(), &["x://a".to_string(), "x://a2".to_string()])
            .await
            .unwrap();
        assert_eq!(updated.entry.locations, vec!["x://a", "x://a2"]);

        let unchanged = resolver
            .add_locations(a.uuid(), &["x://a2".to_string()])
            .await
            .unwrap();
        assert_eq!(unchanged.etag, updated.etag);

        let err = resolver
            .add_locations(a.uuid(), &["x://b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict { .. }));

        let err = resolver
            .add_locations("missing", &["x://c".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_final() {
        let resolver = resolver();
        let record = created(&resolver, body("/a", "s1", &["x://a"])).await;
        resolver.delete(record.uuid()).await.unwrap();
        assert!(matches!(
            resolver.get(record.uuid()).await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            resolver.delete(record.uuid()).await,
            Err(CatalogError::NotFound(_))
        ));
    }
}
