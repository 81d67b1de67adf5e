use tracing::{error, info};

use file_catalog::{open_store, CatalogService, Config, QueryTranslator, WebServer};

#[tokio::main]
async fn main() {
    // Load configuration
    let mut config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();

    // Initialize logging
    if let Err(e) = file_catalog::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        file_catalog::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    info!("File Catalog v{}", env!("CARGO_PKG_VERSION"));

    let store = match open_store(&config.database).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open catalog store: {e}");
            std::process::exit(1);
        }
    };

    let translator = QueryTranslator::new(config.catalog.default_limit, config.catalog.max_limit);
    let catalog = CatalogService::new(store, translator);

    let server = match WebServer::new(&config.server, catalog, &config.catalog.base_url) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to configure web server: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Web server error: {e}");
        std::process::exit(1);
    }
}
