//! Test helpers for the HTTP integration tests.
//!
//! Builds the router over either store backend and provides shortcuts for
//! registering files.

#![allow(dead_code)]

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};

use file_catalog::db::{MemoryStore, SqliteStore};
use file_catalog::web::handlers::AppState;
use file_catalog::web::middleware::RateLimitState;
use file_catalog::web::router::{create_health_router, create_router};
use file_catalog::{CatalogService, QueryTranslator, SharedStore};

/// Page size used when a request gives no `limit`.
pub const DEFAULT_LIMIT: usize = 100;

/// Largest page size a test client may ask for.
pub const MAX_LIMIT: usize = 500;

/// Store backend a test server runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStore {
    Memory,
    Sqlite,
}

impl TestStore {
    /// Every backend; store-dependent tests run once per entry.
    pub const ALL: [TestStore; 2] = [TestStore::Memory, TestStore::Sqlite];

    async fn open(self) -> SharedStore {
        match self {
            TestStore::Memory => Arc::new(MemoryStore::new()),
            TestStore::Sqlite => Arc::new(
                SqliteStore::open_in_memory()
                    .await
                    .expect("Failed to open in-memory SQLite store"),
            ),
        }
    }
}

/// Create a catalog service over a fresh store.
pub async fn create_test_catalog(store: TestStore) -> CatalogService {
    CatalogService::new(
        store.open().await,
        QueryTranslator::new(DEFAULT_LIMIT, MAX_LIMIT),
    )
}

fn server_over(catalog: CatalogService, per_minute: u32) -> TestServer {
    let app_state = Arc::new(AppState::new(catalog, "/api"));
    let rate_limit = Arc::new(RateLimitState::new(per_minute));
    let router = create_router(app_state, rate_limit, &[]).merge(create_health_router());
    TestServer::new(router).expect("Failed to create test server")
}

/// Create a test server over an in-memory store without rate limiting.
pub fn create_test_server() -> TestServer {
    create_test_server_with_rate_limit(0)
}

/// Create a test server over the given backend without rate limiting.
pub async fn create_test_server_on(store: TestStore) -> TestServer {
    server_over(create_test_catalog(store).await, 0)
}

/// Create a test server allowing `per_minute` requests per client.
pub fn create_test_server_with_rate_limit(per_minute: u32) -> TestServer {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let catalog = CatalogService::new(store, QueryTranslator::new(DEFAULT_LIMIT, MAX_LIMIT));
    server_over(catalog, per_minute)
}

/// A complete, valid metadata document.
pub fn file_body(logical_name: &str, sha512: &str, locations: &[&str]) -> Value {
    json!({
        "logical_name": logical_name,
        "locations": locations,
        "file_size": 1024,
        "checksum": {"sha512": sha512},
    })
}

/// Entity tag from a response's `ETag` header, without quotes.
pub fn etag_of(response: &TestResponse) -> String {
    response
        .headers()
        .get("etag")
        .expect("response has no ETag")
        .to_str()
        .unwrap()
        .trim_matches('"')
        .to_string()
}

/// Uuid from a `POST /api/files` response body.
pub fn uuid_of(response: &TestResponse) -> String {
    let body = response.json::<Value>();
    body["file"]
        .as_str()
        .expect("response has no file link")
        .rsplit('/')
        .next()
        .unwrap()
        .to_string()
}

/// Register a file and return its uuid and entity tag.
pub async fn create_file(server: &TestServer, body: Value) -> (String, String) {
    let response = server.post("/api/files").json(&body).await;
    response.assert_status(StatusCode::CREATED);
    (uuid_of(&response), etag_of(&response))
}

/// Fetch an entry's current body.
pub async fn get_file(server: &TestServer, uuid: &str) -> TestResponse {
    server.get(&format!("/api/files/{}", uuid)).await
}
