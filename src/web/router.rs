//! Router configuration for the catalog API.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{
    add_locations, api_root, count_files, create_file, delete_file, get_file, list_files,
    method_not_allowed, patch_file, replace_file, AppState,
};
use super::middleware::{api_rate_limit, create_cors_layer, RateLimitState};
use super::openapi::ApiDoc;

/// Create the main API router.
///
/// Routes hang off the state's base URL. Unsupported verbs on a known route
/// answer 405 with a HAL error body.
pub fn create_router(
    app_state: Arc<AppState>,
    rate_limit: Arc<RateLimitState>,
    cors_origins: &[String],
) -> Router {
    let files = app_state.files_url();

    let api_routes = Router::new()
        .route(
            &app_state.root_url(),
            get(api_root).fallback(method_not_allowed),
        )
        .route(
            &files,
            get(list_files)
                .post(create_file)
                .fallback(method_not_allowed),
        )
        .route(
            &format!("{}/count", files),
            get(count_files).fallback(method_not_allowed),
        )
        .route(
            &format!("{}/:uuid", files),
            get(get_file)
                .put(replace_file)
                .patch(patch_file)
                .delete(delete_file)
                .fallback(method_not_allowed),
        )
        .route(
            &format!("{}/:uuid/locations", files),
            post(add_locations).fallback(method_not_allowed),
        );

    Router::new()
        .merge(api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins))
                .layer(middleware::from_fn(move |req, next| {
                    let state = rate_limit.clone();
                    api_rate_limit(state, req, next)
                })),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

/// Create the Swagger UI router serving the OpenAPI document.
pub fn create_swagger_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_health_router() {
        let _router = create_health_router();
    }

    #[test]
    fn test_create_swagger_router() {
        let _router = create_swagger_router();
    }
}
