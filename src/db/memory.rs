//! In-memory document store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{document_locations, CatalogStore, StoreError, StoreResult};
use crate::catalog::{merge_patch, new_entity_tag, Document, FileRecord, Filter};

struct Row {
    document: Document,
    etag: String,
}

impl Row {
    fn to_record(&self) -> StoreResult<FileRecord> {
        Ok(FileRecord::from_document(self.document.clone(), self.etag.clone())?)
    }
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    rows: BTreeMap<u64, Row>,
    by_uuid: HashMap<String, u64>,
}

impl Inner {
    /// Check the unique fields of `document` against every row except `own`.
    fn check_unique(&self, document: &Document, own: Option<u64>) -> StoreResult<()> {
        let logical_name = document.get("logical_name");
        let locations = document_locations(document);
        for (seq, row) in &self.rows {
            if Some(*seq) == own {
                continue;
            }
            if logical_name.is_some() && row.document.get("logical_name") == logical_name {
                return Err(StoreError::Duplicate("logical_name".to_string()));
            }
            let taken = document_locations(&row.document);
            if locations.iter().any(|l| taken.contains(l)) {
                return Err(StoreError::Duplicate("location".to_string()));
            }
        }
        Ok(())
    }

    /// Sequence number of `uuid`, checking the entity tag.
    fn locate(&self, uuid: &str, expected_tag: &str) -> StoreResult<u64> {
        let seq = *self
            .by_uuid
            .get(uuid)
            .ok_or_else(|| StoreError::NotFound(uuid.to_string()))?;
        match self.rows.get(&seq) {
            Some(row) if row.etag == expected_tag => Ok(seq),
            Some(_) => Err(StoreError::StaleTag {
                uuid: uuid.to_string(),
            }),
            None => Err(StoreError::NotFound(uuid.to_string())),
        }
    }

    fn store_row(&mut self, seq: u64, uuid: &str, mut document: Document) -> StoreResult<FileRecord> {
        document.insert("uuid".to_string(), Value::String(uuid.to_string()));
        self.check_unique(&document, Some(seq))?;
        let etag = new_entity_tag(uuid, &document);
        let row = Row { document, etag };
        let record = row.to_record()?;
        self.rows.insert(seq, row);
        self.by_uuid.insert(uuid.to_string(), seq);
        Ok(record)
    }
}

/// Document store kept entirely in memory.
///
/// Used by the test suite and by `backend = "memory"` deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn find(
        &self,
        filter: &Filter,
        start: usize,
        limit: usize,
    ) -> StoreResult<Vec<FileRecord>> {
        let inner = self.inner.read().await;
        inner
            .rows
            .values()
            .filter(|row| filter.matches(&row.document))
            .skip(start)
            .take(limit)
            .map(Row::to_record)
            .collect()
    }

    async fn count(&self, filter: &Filter) -> StoreResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .filter(|row| filter.matches(&row.document))
            .count())
    }

    async fn get(&self, uuid: &str) -> StoreResult<Option<FileRecord>> {
        let inner = self.inner.read().await;
        inner
            .by_uuid
            .get(uuid)
            .and_then(|seq| inner.rows.get(seq))
            .map(Row::to_record)
            .transpose()
    }

    async fn insert(&self, document: Document) -> StoreResult<FileRecord> {
        let mut inner = self.inner.write().await;
        let uuid = uuid::Uuid::new_v4().to_string();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.store_row(seq, &uuid, document)
    }

    async fn replace(
        &self,
        uuid: &str,
        expected_tag: &str,
        document: Document,
    ) -> StoreResult<FileRecord> {
        let mut inner = self.inner.write().await;
        let seq = inner.locate(uuid, expected_tag)?;
        inner.store_row(seq, uuid, document)
    }

    async fn patch(
        &self,
        uuid: &str,
        expected_tag: &str,
        partial: Document,
    ) -> StoreResult<FileRecord> {
        let mut inner = self.inner.write().await;
        let seq = inner.locate(uuid, expected_tag)?;
        let mut document = inner
            .rows
            .get(&seq)
            .map(|row| row.document.clone())
            .ok_or_else(|| StoreError::NotFound(uuid.to_string()))?;
        merge_patch(&mut document, &partial);
        inner.store_row(seq, uuid, document)
    }

    async fn delete(&self, uuid: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let seq = inner
            .by_uuid
            .remove(uuid)
            .ok_or_else(|| StoreError::NotFound(uuid.to_string()))?;
        inner.rows.remove(&seq);
        Ok(())
    }
}
