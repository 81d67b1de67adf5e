//! Request DTOs for the catalog API.

use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use super::validation::{no_control_chars, non_blank_locations};

/// Body of `POST /api/files/{uuid}/locations`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddLocationsRequest {
    /// Replica URLs to attach to the file.
    #[validate(
        length(min = 1, message = "At least one location is required"),
        custom(function = "non_blank_locations"),
        custom(function = "no_control_chars")
    )]
    pub locations: Vec<String>,
}
