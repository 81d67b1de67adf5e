//! API handlers and the state they share.

pub mod files;
pub mod root;

pub use files::*;
pub use root::*;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::catalog::CatalogService;
use crate::web::dto::HAL_CONTENT_TYPE;
use crate::web::error::ApiError;
use crate::CatalogError;

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Catalog operations.
    pub catalog: CatalogService,
    /// Normalised API prefix, without a trailing slash ("" for the root).
    base_url: String,
}

impl AppState {
    /// Create a new application state.
    pub fn new(catalog: CatalogService, base_url: &str) -> Self {
        Self {
            catalog,
            base_url: normalize_base_url(base_url),
        }
    }

    /// API prefix used for routes and links.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the API root document.
    pub fn root_url(&self) -> String {
        if self.base_url.is_empty() {
            "/".to_string()
        } else {
            self.base_url.clone()
        }
    }

    /// URL of the file collection.
    pub fn files_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    /// URL of one file entry.
    pub fn file_url(&self, uuid: &str) -> String {
        format!("{}/files/{}", self.base_url, uuid)
    }

    /// Convert a catalog error into an API error carrying HAL links.
    ///
    /// Conflicts link the existing entry as `file`; a missing entry links
    /// the collection as `files` so the client can create it there.
    pub fn error(&self, err: CatalogError, self_href: &str) -> ApiError {
        let existing = match &err {
            CatalogError::Conflict {
                existing: Some(uuid),
                ..
            } => Some(self.file_url(uuid)),
            _ => None,
        };
        let not_found = matches!(err, CatalogError::NotFound(_));

        let mut api_err = ApiError::from(err).with_link("self", self_href);
        if let Some(href) = existing {
            api_err = api_err.with_link("file", href);
        }
        if not_found {
            api_err = api_err.with_link("files", self.files_url());
        }
        api_err
    }
}

fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Serialize `body` as HAL JSON, optionally with an `ETag` header.
pub fn hal_response<T: Serialize>(status: StatusCode, body: T, etag: Option<&str>) -> Response {
    let mut response = (
        status,
        [(header::CONTENT_TYPE, HAL_CONTENT_TYPE)],
        Json(body),
    )
        .into_response();
    if let Some(tag) = etag {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", tag)) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::QueryTranslator;
    use crate::db::MemoryStore;
    use std::sync::Arc;

    fn state(base: &str) -> AppState {
        let catalog = CatalogService::new(
            Arc::new(MemoryStore::new()),
            QueryTranslator::new(10, 10),
        );
        AppState::new(catalog, base)
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("/api"), "/api");
        assert_eq!(normalize_base_url("/api/"), "/api");
        assert_eq!(normalize_base_url("api"), "/api");
        assert_eq!(normalize_base_url("/"), "");
        assert_eq!(normalize_base_url(""), "");
    }

    #[test]
    fn test_urls() {
        let state = state("/api/");
        assert_eq!(state.root_url(), "/api");
        assert_eq!(state.files_url(), "/api/files");
        assert_eq!(state.file_url("u1"), "/api/files/u1");

        let state = self::state("");
        assert_eq!(state.root_url(), "/");
        assert_eq!(state.files_url(), "/files");
    }

    #[test]
    fn test_hal_response_sets_headers() {
        let response = hal_response(StatusCode::OK, serde_json::json!({}), Some("abc"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ETAG], "\"abc\"");
        assert_eq!(response.headers()[header::CONTENT_TYPE], HAL_CONTENT_TYPE);
    }

    #[test]
    fn test_error_links() {
        let state = state("/api");
        let err = state.error(CatalogError::NotFound("u1".to_string()), "/api/files/u1");
        assert_eq!(err.code(), crate::web::error::ErrorCode::NotFound);

        let response = state
            .error(CatalogError::conflict("taken", "u2"), "/api/files")
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
