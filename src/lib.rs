//! File Catalog - a metadata catalog for file replicas.
//!
//! Pipelines register files (logical name, replica locations, size,
//! checksums and free-form attributes) and later find them again through a
//! HAL JSON API. File bytes never pass through the catalog.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod web;

pub use catalog::{CatalogService, FileEntry, FileRecord, QueryTranslator, SchemaValidator};
pub use config::Config;
pub use db::{open_store, CatalogStore, MemoryStore, SharedStore};
pub use error::{CatalogError, Result};
pub use web::WebServer;
