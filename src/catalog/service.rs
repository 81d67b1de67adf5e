//! Catalog service: read queries plus the conflict resolver behind one handle.

use serde_json::Value;

use super::entry::{Document, FileRecord};
use super::query::{FileQueryParams, QueryTranslator};
use super::resolver::{ConflictResolver, CreateOutcome};
use super::schema::SchemaValidator;
use crate::db::SharedStore;
use crate::Result;

/// Entry point used by the web layer.
#[derive(Clone)]
pub struct CatalogService {
    store: SharedStore,
    translator: QueryTranslator,
    resolver: ConflictResolver,
}

impl CatalogService {
    /// Create a service over a store.
    pub fn new(store: SharedStore, translator: QueryTranslator) -> Self {
        let resolver = ConflictResolver::new(store.clone(), SchemaValidator::default());
        Self {
            store,
            translator,
            resolver,
        }
    }

    /// Matching entries, windowed and projected.
    pub async fn list(&self, params: &FileQueryParams) -> Result<Vec<Document>> {
        let query = self.translator.translate(params)?;
        let records = self
            .store
            .find(&query.filter, query.window.start, query.window.limit)
            .await?;
        Ok(records
            .into_iter()
            .map(|record| query.projection.apply(record.to_document()))
            .collect())
    }

    /// Number of matching entries.
    pub async fn count(&self, params: &FileQueryParams) -> Result<usize> {
        let filter = self.translator.translate_filter(params)?;
        Ok(self.store.count(&filter).await?)
    }

    /// One entry by uuid.
    pub async fn get(&self, uuid: &str) -> Result<FileRecord> {
        self.resolver.get(uuid).await
    }

    pub async fn create(&self, body: Value) -> Result<CreateOutcome> {
        self.resolver.create(body).await
    }

    pub async fn replace(&self, uuid: &str, if_match: Option<&str>, body: Value) -> Result<FileRecord> {
        self.resolver.replace(uuid, if_match, body).await
    }

    pub async fn patch(&self, uuid: &str, if_match: Option<&str>, body: Value) -> Result<FileRecord> {
        self.resolver.patch(uuid, if_match, body).await
    }

    pub async fn delete(&self, uuid: &str) -> Result<()> {
        self.resolver.delete(uuid).await
    }

    pub async fn add_locations(&self, uuid: &str, locations: &[String]) -> Result<FileRecord> {
        self.resolver.add_locations(uuid, locations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    async fn seeded() -> CatalogService {
        let service = CatalogService::new(Arc::new(MemoryStore::new()), QueryTranslator::new(3, 4));
        for i in 0..5 {
            let level = if i % 2 == 0 { "L2" } else { "L3" };
            service
                .create(json!({
                    "logical_name": format!("/data/exp/f{i}.i3"),
                    "locations": [format!("x://{i}")],
                    "file_size": i,
                    "checksum": {"sha512": format!("sha{i}")},
                    "processing_level": level
                }))
                .await
                .unwrap();
        }
        service
    }

    #[tokio::test]
    async fn test_list_uses_default_limit_and_projection() {
        let service = seeded().await;
        let files = service.list(&FileQueryParams::default()).await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].len(), 2);
        assert_eq!(files[0]["logical_name"], json!("/data/exp/f0.i3"));
    }

    #[tokio::test]
    async fn test_count_ignores_window() {
        let service = seeded().await;
        let params = FileQueryParams {
            processing_level: Some("L2".to_string()),
            limit: Some("1".to_string()),
            ..Default::default()
        };
        assert_eq!(service.count(&params).await.unwrap(), 3);
        assert_eq!(service.list(&params).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_params() {
        let service = seeded().await;
        let params = FileQueryParams {
            start: Some("-1".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            service.list(&params).await,
            Err(crate::CatalogError::Query(_))
        ));
    }
}
