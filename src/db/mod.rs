//! Catalog store adapter.
//!
//! The rest of the crate talks to the document store only through the
//! [`CatalogStore`] trait. Two backends are provided: a SQLite document
//! store built on `sqlx` and an in-memory store for tests and ephemeral
//! deployments.

mod memory;
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
pub use schema::MIGRATIONS;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::{Document, FileRecord, Filter};
use crate::config::{DatabaseConfig, StoreBackend};
use crate::CatalogError;

/// Errors reported by a store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no document with uuid {0}")]
    NotFound(String),

    #[error("document {uuid} was modified concurrently")]
    StaleTag { uuid: String },

    /// A uniquely indexed value is already held by another document.
    #[error("{0} already belongs to another file")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store failure: {0}")]
    Backend(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(uuid) => CatalogError::NotFound(uuid),
            StoreError::StaleTag { uuid } => CatalogError::StaleEntityTag { uuid },
            StoreError::Duplicate(field) => CatalogError::Conflict {
                message: format!("{field} already belongs to another file"),
                existing: None,
            },
            StoreError::Unavailable(msg) => CatalogError::Unavailable(msg),
            StoreError::Backend(msg) => CatalogError::Database(msg),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                let message = db.message();
                let field = if message.contains("logical_name") {
                    "logical_name"
                } else if message.contains("location") {
                    "location"
                } else {
                    "uuid"
                };
                StoreError::Duplicate(field.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("corrupt document: {err}"))
    }
}

/// Document store holding file entries.
///
/// Every write touches exactly one document and is atomic. `replace` and
/// `patch` only apply when the stored entity tag still equals
/// `expected_tag`; otherwise they fail with [`StoreError::StaleTag`].
/// Results of `find` are ordered by insertion.
///
/// `uuid`, `logical_name` and every entry of `locations` are unique across
/// the store; a write that would break this fails with
/// [`StoreError::Duplicate`].
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Short name of the backend.
    fn backend_name(&self) -> &'static str;

    /// Matching documents, skipping `start` and returning at most `limit`.
    async fn find(&self, filter: &Filter, start: usize, limit: usize)
        -> StoreResult<Vec<FileRecord>>;

    /// Number of matching documents.
    async fn count(&self, filter: &Filter) -> StoreResult<usize>;

    /// First matching document.
    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<FileRecord>> {
        Ok(self.find(filter, 0, 1).await?.into_iter().next())
    }

    /// Document by uuid.
    async fn get(&self, uuid: &str) -> StoreResult<Option<FileRecord>> {
        self.find_one(&Filter::eq("uuid", uuid)).await
    }

    /// Store a new document, assigning its uuid and entity tag.
    async fn insert(&self, document: Document) -> StoreResult<FileRecord>;

    /// Replace a document wholesale.
    async fn replace(
        &self,
        uuid: &str,
        expected_tag: &str,
        document: Document,
    ) -> StoreResult<FileRecord>;

    /// Merge a partial document into the stored one (JSON merge patch).
    async fn patch(&self, uuid: &str, expected_tag: &str, partial: Document)
        -> StoreResult<FileRecord>;

    /// Remove a document.
    async fn delete(&self, uuid: &str) -> StoreResult<()>;
}

/// Store handle shared between request handlers.
pub type SharedStore = Arc<dyn CatalogStore>;

/// Run a store call with a deadline.
pub async fn timed<T, F>(timeout: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "no answer within {} ms",
            timeout.as_millis()
        ))),
    }
}

/// Store decorator that bounds every call with a timeout.
pub struct TimedStore {
    inner: SharedStore,
    timeout: Duration,
}

impl TimedStore {
    /// Wrap a store.
    pub fn new(inner: SharedStore, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Wrap a store and return it as a shared handle.
    pub fn shared(inner: SharedStore, timeout: Duration) -> SharedStore {
        Arc::new(Self::new(inner, timeout))
    }
}

#[async_trait]
impl CatalogStore for TimedStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn find(
        &self,
        filter: &Filter,
        start: usize,
        limit: usize,
    ) -> StoreResult<Vec<FileRecord>> {
        timed(self.timeout, self.inner.find(filter, start, limit)).await
    }

    async fn count(&self, filter: &Filter) -> StoreResult<usize> {
        timed(self.timeout, self.inner.count(filter)).await
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<FileRecord>> {
        timed(self.timeout, self.inner.find_one(filter)).await
    }

    async fn get(&self, uuid: &str) -> StoreResult<Option<FileRecord>> {
        timed(self.timeout, self.inner.get(uuid)).await
    }

    async fn insert(&self, document: Document) -> StoreResult<FileRecord> {
        timed(self.timeout, self.inner.insert(document)).await
    }

    async fn replace(
        &self,
        uuid: &str,
        expected_tag: &str,
        document: Document,
    ) -> StoreResult<FileRecord> {
        timed(self.timeout, self.inner.replace(uuid, expected_tag, document)).await
    }

    async fn patch(
        &self,
        uuid: &str,
        expected_tag: &str,
        partial: Document,
    ) -> StoreResult<FileRecord> {
        timed(self.timeout, self.inner.patch(uuid, expected_tag, partial)).await
    }

    async fn delete(&self, uuid: &str) -> StoreResult<()> {
        timed(self.timeout, self.inner.delete(uuid)).await
    }
}

/// Open the store selected by `config`, bounded by its call timeout.
pub async fn open_store(config: &DatabaseConfig) -> crate::Result<SharedStore> {
    let inner: SharedStore = match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; entries are lost on exit");
            Arc::new(MemoryStore::new())
        }
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.path).await?),
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => {
            return Err(CatalogError::Config(
                "built without the `sqlite` feature".to_string(),
            ))
        }
    };
    tracing::info!(
        backend = inner.backend_name(),
        timeout_ms = config.store_timeout_ms,
        "Catalog store ready"
    );
    Ok(TimedStore::shared(inner, config.store_timeout()))
}

/// Locations listed in a document, if any.
pub(crate) fn document_locations(document: &Document) -> Vec<String> {
    document
        .get("locations")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|l| l.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
