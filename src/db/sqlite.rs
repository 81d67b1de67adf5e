//! SQLite document store.
//!
//! Each file entry is one row in `files` with its JSON document in a text
//! column. `uuid`, `logical_name` and `checksum.sha512` are mirrored into
//! indexed columns and locations into `file_locations`, so the lookups the
//! conflict resolver depends on are answered by SQLite and uniqueness is
//! enforced by the database. Any other filter is evaluated on the decoded
//! documents, walking rows in `seq` (insertion) order.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use super::{document_locations, CatalogStore, StoreError, StoreResult, MIGRATIONS};
use crate::catalog::{merge_patch, new_entity_tag, Document, FileRecord, Filter};

#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    etag: String,
    document: String,
}

impl FileRow {
    fn into_record(self) -> StoreResult<FileRecord> {
        let document: Document = serde_json::from_str(&self.document)?;
        Ok(FileRecord::from_document(document, self.etag)?)
    }
}

/// Indexed column a filter can be narrowed by.
enum Lookup<'a> {
    Uuid(&'a str),
    LogicalName(&'a str),
    Sha512(&'a str),
    Location(&'a str),
    Scan,
}

impl<'a> Lookup<'a> {
    fn for_filter(filter: &'a Filter) -> Self {
        let text = |field: &str| filter.equality_on(field).and_then(Value::as_str);
        if let Some(uuid) = text("uuid") {
            Lookup::Uuid(uuid)
        } else if let Some(name) = text("logical_name") {
            Lookup::LogicalName(name)
        } else if let Some(sha) = text("checksum.sha512") {
            Lookup::Sha512(sha)
        } else if let Some(location) = text("locations") {
            Lookup::Location(location)
        } else {
            Lookup::Scan
        }
    }

    fn sql(&self) -> (String, Option<&'a str>) {
        let (clause, value) = match self {
            Lookup::Uuid(v) => ("WHERE f.uuid = ?", Some(*v)),
            Lookup::LogicalName(v) => ("WHERE f.logical_name = ?", Some(*v)),
            Lookup::Sha512(v) => ("WHERE f.sha512 = ?", Some(*v)),
            Lookup::Location(v) => (
                "JOIN file_locations l ON l.uuid = f.uuid WHERE l.location = ?",
                Some(*v),
            ),
            Lookup::Scan => ("", None),
        };
        (
            format!("SELECT f.etag, f.document FROM files f {clause} ORDER BY f.seq"),
            value,
        )
    }
}

/// Stream the rows matching `filter` in insertion order, handing each
/// matching record to `visit` until it returns `false`.
async fn scan<F>(pool: &SqlitePool, filter: &Filter, mut visit: F) -> StoreResult<()>
where
    F: FnMut(FileRecord) -> bool,
{
    let (sql, value) = Lookup::for_filter(filter).sql();
    let mut query = sqlx::query_as::<_, FileRow>(&sql);
    if let Some(value) = value {
        query = query.bind(value);
    }

    let mut rows = query.fetch(pool);
    while let Some(row) = rows.try_next().await? {
        let record = row.into_record()?;
        if filter.matches(&record.to_document()) && !visit(record) {
            break;
        }
    }
    Ok(())
}

fn indexed_fields(document: &Document) -> StoreResult<(String, String)> {
    let logical_name = document
        .get("logical_name")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Backend("document has no logical_name".to_string()))?;
    let sha512 = document
        .get("checksum")
        .and_then(|c| c.get("sha512"))
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Backend("document has no checksum.sha512".to_string()))?;
    Ok((logical_name.to_string(), sha512.to_string()))
}

async fn write_locations(
    tx: &mut Transaction<'_, Sqlite>,
    uuid: &str,
    document: &Document,
) -> StoreResult<()> {
    sqlx::query("DELETE FROM file_locations WHERE uuid = ?")
        .bind(uuid)
        .execute(&mut **tx)
        .await?;
    for location in document_locations(document) {
        sqlx::query("INSERT INTO file_locations (location, uuid) VALUES (?, ?)")
            .bind(location)
            .bind(uuid)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Document store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) the database at `path`, applying
    /// pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!("Opening catalog database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> StoreResult<Self> {
        debug!("Opening in-memory catalog database");
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // every connection would get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> StoreResult<i64> {
        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        )
        .fetch_one(&self.pool)
        .await?;

        if !table_exists {
            return Ok(0);
        }

        let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        let current_version = self.schema_version().await?;

        if current_version as usize >= MIGRATIONS.len() {
            debug!("Database is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating database from version {} to {}",
            current_version,
            MIGRATIONS.len()
        );

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(current_version as usize) {
            let version = (i + 1) as i64;
            info!("Applying migration v{}", version);

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        info!(
            "Database migration complete (now at version {})",
            MIGRATIONS.len()
        );
        Ok(())
    }

    /// Why a conditional update touched no row.
    async fn miss_reason(&self, uuid: &str) -> StoreResult<StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM files WHERE uuid = ?)")
            .bind(uuid)
            .fetch_one(&self.pool)
            .await?;
        Ok(if exists {
            StoreError::StaleTag {
                uuid: uuid.to_string(),
            }
        } else {
            StoreError::NotFound(uuid.to_string())
        })
    }

    /// Overwrite the stored document if its tag still equals `expected_tag`.
    async fn swap(
        &self,
        uuid: &str,
        expected_tag: &str,
        mut document: Document,
    ) -> StoreResult<FileRecord> {
        document.insert("uuid".to_string(), Value::String(uuid.to_string()));
        let (logical_name, sha512) = indexed_fields(&document)?;
        let etag = new_entity_tag(uuid, &document);
        let body = serde_json::to_string(&document)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE files SET logical_name = ?, sha512 = ?, etag = ?, document = ?, \
             updated_at = datetime('now') WHERE uuid = ? AND etag = ?",
        )
        .bind(&logical_name)
        .bind(&sha512)
        .bind(&etag)
        .bind(&body)
        .bind(uuid)
        .bind(expected_tag)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.miss_reason(uuid).await?);
        }

        write_locations(&mut tx, uuid, &document).await?;
        tx.commit().await?;

        Ok(FileRecord::from_document(document, etag)?)
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn find(
        &self,
        filter: &Filter,
        start: usize,
        limit: usize,
    ) -> StoreResult<Vec<FileRecord>> {
        let mut records = Vec::new();
        if limit == 0 {
            return Ok(records);
        }
        let mut skipped = 0;
        scan(&self.pool, filter, |record| {
            if skipped < start {
                skipped += 1;
                return true;
            }
            records.push(record);
            records.len() < limit
        })
        .await?;
        Ok(records)
    }

    async fn count(&self, filter: &Filter) -> StoreResult<usize> {
        if matches!(filter, Filter::All) {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
                .fetch_one(&self.pool)
                .await?;
            return Ok(count as usize);
        }
        let mut count = 0;
        scan(&self.pool, filter, |_| {
            count += 1;
            true
        })
        .await?;
        Ok(count)
    }

    async fn get(&self, uuid: &str) -> StoreResult<Option<FileRecord>> {
        let row: Option<FileRow> =
            sqlx::query_as("SELECT etag, document FROM files WHERE uuid = ?")
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        row.map(FileRow::into_record).transpose()
    }

    async fn insert(&self, mut document: Document) -> StoreResult<FileRecord> {
        let uuid = uuid::Uuid::new_v4().to_string();
        document.insert("uuid".to_string(), Value::String(uuid.clone()));
        let (logical_name, sha512) = indexed_fields(&document)?;
        let etag = new_entity_tag(&uuid, &document);
        let body = serde_json::to_string(&document)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO files (uuid, logical_name, sha512, etag, document) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&uuid)
        .bind(&logical_name)
        .bind(&sha512)
        .bind(&etag)
        .bind(&body)
        .execute(&mut *tx)
        .await?;
        write_locations(&mut tx, &uuid, &document).await?;
        tx.commit().await?;

        debug!(uuid = %uuid, "inserted file document");
        Ok(FileRecord::from_document(document, etag)?)
    }

    async fn replace(
        &self,
        uuid: &str,
        expected_tag: &str,
        document: Document,
    ) -> StoreResult<FileRecord> {
        self.swap(uuid, expected_tag, document).await
    }

    async fn patch(
        &self,
        uuid: &str,
        expected_tag: &str,
        partial: Document,
    ) -> StoreResult<FileRecord> {
        let row: Option<FileRow> =
            sqlx::query_as("SELECT etag, document FROM files WHERE uuid = ?")
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        let row = row.ok_or_else(|| StoreError::NotFound(uuid.to_string()))?;
        if row.etag != expected_tag {
            return Err(StoreError::StaleTag {
                uuid: uuid.to_string(),
            });
        }

        let mut document: Document = serde_json::from_str(&row.document)?;
        merge_patch(&mut document, &partial);
        // the conditional update catches writers that slipped in since the read
        self.swap(uuid, expected_tag, document).await
    }

    async fn delete(&self, uuid: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_locations WHERE uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM files WHERE uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(uuid.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }
}
