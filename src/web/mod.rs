//! HTTP interface of the catalog.
//!
//! A HAL JSON API over the file collection (`/api/files`) and its entries
//! (`/api/files/{uuid}`), plus health and OpenAPI routes.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use handlers::AppState;
pub use router::create_router;
pub use server::WebServer;
