//! OpenAPI description of the catalog API.

use utoipa::OpenApi;

use super::dto::{
    AddLocationsRequest, ApiRootResponse, FileCountResponse, FileLinkResponse, FileListResponse,
    FileMetadata, Link,
};
use super::handlers::{files, root};

#[derive(OpenApi)]
#[openapi(
    info(title = "File Catalog API", description = "Metadata catalog for file replicas"),
    paths(
        root::api_root,
        files::list_files,
        files::count_files,
        files::create_file,
        files::get_file,
        files::replace_file,
        files::patch_file,
        files::delete_file,
        files::add_locations,
    ),
    components(schemas(
        Link,
        ApiRootResponse,
        FileListResponse,
        FileCountResponse,
        FileLinkResponse,
        FileMetadata,
        AddLocationsRequest,
    )),
    tags(
        (name = "catalog", description = "API entry point"),
        (name = "files", description = "File metadata entries")
    )
)]
pub struct ApiDoc;
