//! Request body extractors and custom validators.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, OriginalUri, Request},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::web::error::ApiError;

/// Path the client addressed, before any nesting was stripped.
fn request_path(req: &Request) -> String {
    req.extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path())
        .unwrap_or_else(|| req.uri().path())
        .to_string()
}

/// A JSON extractor that validates the request body.
///
/// The body is deserialized and then checked with the `validator` crate;
/// failures come back as a 400 with field-level details.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let self_href = request_path(&req);
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            ApiError::bad_request(format!("Invalid JSON: {}", e)).with_link("self", &self_href)
        })?;

        value
            .validate()
            .map_err(|e| ApiError::from_validation_errors(e).with_link("self", &self_href))?;

        Ok(ValidatedJson(value))
    }
}

/// A JSON extractor for free-form metadata documents.
///
/// Only checks that the body is a JSON object; the schema validator does
/// the rest.
pub struct DocumentJson(pub Value);

#[async_trait]
impl<S> FromRequest<S> for DocumentJson
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let self_href = request_path(&req);
        let Json(value) = Json::<Value>::from_request(req, state).await.map_err(|e| {
            ApiError::bad_request(format!("Invalid JSON: {}", e)).with_link("self", &self_href)
        })?;

        if !value.is_object() {
            return Err(ApiError::bad_request("Request body must be a JSON object")
                .with_link("self", self_href));
        }

        Ok(DocumentJson(value))
    }
}

// ============================================================================
// Custom Validators
// ============================================================================

/// Validate that every location is a non-empty string.
pub fn non_blank_locations(locations: &[String]) -> Result<(), validator::ValidationError> {
    if locations.iter().any(|l| l.trim().is_empty()) {
        return Err(validator::ValidationError::new("non_blank_locations")
            .with_message("Locations must be non-empty strings".into()));
    }
    Ok(())
}

/// Validate that no location contains control characters.
pub fn no_control_chars(locations: &[String]) -> Result<(), validator::ValidationError> {
    if locations.iter().any(|l| l.chars().any(char::is_control)) {
        return Err(validator::ValidationError::new("no_control_chars")
            .with_message("Must not contain control characters".into()));
    }
    Ok(())
}
