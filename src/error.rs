//! Error types for the file catalog.

use thiserror::Error;

use crate::catalog::{QueryError, ValidationError};

/// Common error type for catalog operations.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Candidate metadata failed schema validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Query parameters could not be translated into a filter.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// No file entry exists for the given uuid.
    #[error("file {0} not found")]
    NotFound(String),

    /// The request collides with an existing file entry.
    #[error("conflict: {message}")]
    Conflict {
        /// Human-readable description of the collision.
        message: String,
        /// Uuid of the entry the request collides with.
        existing: Option<String>,
    },

    /// The entity tag presented by the client is not the current one.
    #[error("entity tag for file {uuid} is stale")]
    StaleEntityTag {
        /// Uuid of the file whose tag moved on.
        uuid: String,
    },

    /// The document store did not answer in time or refused the connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other document store failure.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CatalogError {
    /// Create a conflict error pointing at an existing entry.
    pub fn conflict(message: impl Into<String>, existing: impl Into<String>) -> Self {
        CatalogError::Conflict {
            message: message.into(),
            existing: Some(existing.into()),
        }
    }
}

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
