//! File entry handlers.

use axum::{
    extract::{rejection::QueryRejection, OriginalUri, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::catalog::{CreateOutcome, FileQueryParams, FileRecord};
use crate::web::dto::{
    file_document, links, AddLocationsRequest, DocumentJson, FileCountResponse, FileLinkResponse,
    FileListResponse, FileMetadata, ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::{hal_response, AppState};

fn query_params(
    params: Result<Query<FileQueryParams>, QueryRejection>,
    self_href: &str,
) -> Result<FileQueryParams, ApiError> {
    params.map(|Query(p)| p).map_err(|e| {
        ApiError::bad_request(format!("Invalid query string: {}", e)).with_link("self", self_href)
    })
}

fn if_match(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
}

/// 200 response carrying the full entry.
fn file_response(state: &AppState, record: FileRecord) -> Response {
    let self_href = state.file_url(record.uuid());
    let body = file_document(
        record.to_document(),
        links([("self", self_href), ("parent", state.files_url())]),
        &record.etag,
    );
    hal_response(StatusCode::OK, body, Some(&record.etag))
}

/// GET /api/files - Query the catalog.
#[utoipa::path(
    get,
    path = "/api/files",
    tag = "files",
    params(FileQueryParams),
    responses(
        (status = 200, description = "Matching file entries", body = FileListResponse),
        (status = 400, description = "Invalid query parameters"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    params: Result<Query<FileQueryParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let self_href = uri.to_string();
    let params = query_params(params, &self_href)?;

    let files = state
        .catalog
        .list(&params)
        .await
        .map_err(|e| state.error(e, &self_href))?;

    let body = FileListResponse {
        links: links([("self", self_href), ("parent", state.root_url())]),
        files,
    };
    Ok(hal_response(StatusCode::OK, body, None))
}

/// GET /api/files/count - Count matching entries.
#[utoipa::path(
    get,
    path = "/api/files/count",
    tag = "files",
    params(FileQueryParams),
    responses(
        (status = 200, description = "Number of matching entries", body = FileCountResponse),
        (status = 400, description = "Invalid query parameters")
    )
)]
pub async fn count_files(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    params: Result<Query<FileQueryParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let self_href = uri.to_string();
    let params = query_params(params, &self_href)?;

    let files = state
        .catalog
        .count(&params)
        .await
        .map_err(|e| state.error(e, &self_href))?;

    let body = FileCountResponse {
        links: links([("self", self_href), ("parent", state.files_url())]),
        files,
    };
    Ok(hal_response(StatusCode::OK, body, None))
}

/// POST /api/files - Register a file or a new replica of it.
#[utoipa::path(
    post,
    path = "/api/files",
    tag = "files",
    request_body(content = FileMetadata, description = "File metadata without uuid"),
    responses(
        (status = 201, description = "File created", body = FileLinkResponse),
        (status = 200, description = "Replica added to the existing file", body = FileLinkResponse),
        (status = 400, description = "Metadata failed validation"),
        (status = 409, description = "Conflicts with an existing file")
    )
)]
pub async fn create_file(
    State(state): State<Arc<AppState>>,
    DocumentJson(body): DocumentJson,
) -> Result<Response, ApiError> {
    let files_url = state.files_url();
    let outcome = state
        .catalog
        .create(body)
        .await
        .map_err(|e| state.error(e, &files_url))?;

    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let record = outcome.record();
    if let CreateOutcome::AlreadyPresent(_) = &outcome {
        tracing::debug!(uuid = %record.uuid(), "replica already registered");
    }
    let file_url = state.file_url(record.uuid());

    let body = FileLinkResponse {
        links: links([("self", files_url), ("parent", state.root_url())]),
        file: file_url.clone(),
    };
    let mut response = hal_response(status, body, Some(&record.etag));
    if let Ok(location) = file_url.parse() {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// GET /api/files/{uuid} - Fetch one entry.
#[utoipa::path(
    get,
    path = "/api/files/{uuid}",
    tag = "files",
    params(("uuid" = String, Path, description = "File uuid")),
    responses(
        (status = 200, description = "File metadata", body = FileMetadata),
        (status = 404, description = "No such file")
    )
)]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    let record = state
        .catalog
        .get(&uuid)
        .await
        .map_err(|e| state.error(e, &state.file_url(&uuid)))?;
    Ok(file_response(&state, record))
}

/// PUT /api/files/{uuid} - Replace an entry.
#[utoipa::path(
    put,
    path = "/api/files/{uuid}",
    tag = "files",
    params(
        ("uuid" = String, Path, description = "File uuid"),
        ("If-Match" = Option<String>, Header, description = "Current entity tag")
    ),
    request_body(content = FileMetadata, description = "Complete file metadata"),
    responses(
        (status = 200, description = "File replaced", body = FileMetadata),
        (status = 400, description = "Metadata failed validation or entity tag missing"),
        (status = 404, description = "No such file"),
        (status = 409, description = "Stale entity tag or conflicting metadata")
    )
)]
pub async fn replace_file(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    DocumentJson(body): DocumentJson,
) -> Result<Response, ApiError> {
    let record = state
        .catalog
        .replace(&uuid, if_match(&headers), body)
        .await
        .map_err(|e| state.error(e, &state.file_url(&uuid)))?;
    Ok(file_response(&state, record))
}

/// PATCH /api/files/{uuid} - Merge fields into an entry; `null` removes.
#[utoipa::path(
    patch,
    path = "/api/files/{uuid}",
    tag = "files",
    params(
        ("uuid" = String, Path, description = "File uuid"),
        ("If-Match" = Option<String>, Header, description = "Current entity tag")
    ),
    request_body(content = FileMetadata, description = "Partial file metadata; `null` removes a field"),
    responses(
        (status = 200, description = "File updated", body = FileMetadata),
        (status = 400, description = "Metadata failed validation or entity tag missing"),
        (status = 404, description = "No such file"),
        (status = 409, description = "Stale entity tag or conflicting metadata")
    )
)]
pub async fn patch_file(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    DocumentJson(body): DocumentJson,
) -> Result<Response, ApiError> {
    let record = state
        .catalog
        .patch(&uuid, if_match(&headers), body)
        .await
        .map_err(|e| state.error(e, &state.file_url(&uuid)))?;
    Ok(file_response(&state, record))
}

/// DELETE /api/files/{uuid} - Remove an entry.
#[utoipa::path(
    delete,
    path = "/api/files/{uuid}",
    tag = "files",
    params(("uuid" = String, Path, description = "File uuid")),
    responses(
        (status = 204, description = "File deleted"),
        (status = 404, description = "No such file")
    )
)]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .catalog
        .delete(&uuid)
        .await
        .map_err(|e| state.error(e, &state.file_url(&uuid)))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/files/{uuid}/locations - Attach replica locations.
#[utoipa::path(
    post,
    path = "/api/files/{uuid}/locations",
    tag = "files",
    params(("uuid" = String, Path, description = "File uuid")),
    request_body = AddLocationsRequest,
    responses(
        (status = 200, description = "Locations added", body = FileMetadata),
        (status = 400, description = "Invalid locations"),
        (status = 404, description = "No such file"),
        (status = 409, description = "A location belongs to another file")
    )
)]
pub async fn add_locations(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    ValidatedJson(req): ValidatedJson<AddLocationsRequest>,
) -> Result<Response, ApiError> {
    let record = state
        .catalog
        .add_locations(&uuid, &req.locations)
        .await
        .map_err(|e| state.error(e, &format!("{}/locations", state.file_url(&uuid))))?;
    Ok(file_response(&state, record))
}

/// Fallback for verbs a route does not support.
pub async fn method_not_allowed(OriginalUri(uri): OriginalUri) -> Response {
    ApiError::method_not_allowed("Method not allowed on this resource")
        .with_link("self", uri.path())
        .into_response()
}
