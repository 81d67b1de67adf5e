//! The file catalog core: entry model, schema validation, query
//! translation and conflict resolution.

mod entry;
mod filter;
mod merge;
mod query;
mod resolver;
mod schema;
mod service;

pub use entry::{
    new_entity_tag, normalize_entity_tag, timestamp_now, Checksum, Document, FileEntry, FileRecord,
};
pub use filter::{CmpOp, Filter};
pub use merge::{merge_locations, merge_patch};
pub use query::{FileQuery, FileQueryParams, Projection, QueryError, QueryTranslator, Window};
pub use resolver::{strip_reserved, ConflictResolver, CreateOutcome, RESERVED_FIELDS};
pub use schema::{
    FieldKind, FieldRule, FieldViolation, Mode, Presence, SchemaValidator, ValidatedDocument,
    ValidationError, FIELD_RULES,
};
pub use service::CatalogService;
