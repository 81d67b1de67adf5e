//! API root handler.

use axum::{extract::State, http::StatusCode, response::Response};
use std::sync::Arc;

use crate::web::dto::{links, ApiRootResponse};
use crate::web::handlers::{hal_response, AppState};

/// GET /api - Entry point linking the file collection.
#[utoipa::path(
    get,
    path = "/api",
    tag = "catalog",
    responses(
        (status = 200, description = "API root", body = ApiRootResponse)
    )
)]
pub async fn api_root(State(state): State<Arc<AppState>>) -> Response {
    let body = ApiRootResponse {
        links: links([("self", state.root_url()), ("files", state.files_url())]),
    };
    hal_response(StatusCode::OK, body, None)
}
