//! SQLite schema migrations for the file catalog.
//!
//! Applied in order when the store is opened; the `schema_version` table
//! records which ones already ran.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: file documents
    r#"
CREATE TABLE files (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
    uuid          TEXT NOT NULL UNIQUE,
    logical_name  TEXT NOT NULL UNIQUE,
    sha512        TEXT NOT NULL,
    etag          TEXT NOT NULL,
    document      TEXT NOT NULL,                      -- full JSON document
    created_at    TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_files_sha512 ON files(sha512);
"#,
    // v2: replica locations, one row per location
    r#"
CREATE TABLE file_locations (
    location  TEXT PRIMARY KEY,
    uuid      TEXT NOT NULL REFERENCES files(uuid) ON DELETE CASCADE
);

CREATE INDEX idx_file_locations_uuid ON file_locations(uuid);
"#,
];
