//! Configuration module for the file catalog.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{CatalogError, Result};

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// API rate limit (requests per minute per IP). 0 disables rate limiting.
    #[serde(default = "default_api_rate_limit")]
    pub api_rate_limit: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_api_rate_limit() -> u32 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            api_rate_limit: default_api_rate_limit(),
        }
    }
}

/// Which store implementation holds the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite database file at `database.path`.
    #[default]
    Sqlite,
    /// Process memory; contents are lost on exit.
    Memory,
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Store implementation.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Deadline for a single store call, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
}

fn default_db_path() -> String {
    "data/file_catalog.db".to_string()
}

fn default_store_timeout() -> u64 {
    5000
}

impl DatabaseConfig {
    /// Store call deadline.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            backend: StoreBackend::default(),
            store_timeout_ms: default_store_timeout(),
        }
    }
}

/// Catalog API behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Page size when a listing gives no `limit`.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Largest page size a client may ask for.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    /// Path prefix of the API, used in HAL links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_limit() -> usize {
    10000
}

fn default_max_limit() -> usize {
    10000
}

fn default_base_url() -> String {
    "/api".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            base_url: default_base_url(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/file_catalog.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Catalog configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CatalogError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| CatalogError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FILE_CATALOG_DB_PATH`: database file
    /// - `FILE_CATALOG_PORT`: listen port
    /// - `FILE_CATALOG_LOG_LEVEL`: log level
    ///
    /// Empty or unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FILE_CATALOG_DB_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(port) = std::env::var("FILE_CATALOG_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("FILE_CATALOG_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.catalog.default_limit == 0 {
            return Err(CatalogError::Config(
                "catalog.default_limit must be at least 1".to_string(),
            ));
        }
        if self.catalog.default_limit > self.catalog.max_limit {
            return Err(CatalogError::Config(format!(
                "catalog.default_limit ({}) exceeds catalog.max_limit ({})",
                self.catalog.default_limit, self.catalog.max_limit
            )));
        }
        if self.database.store_timeout_ms == 0 {
            return Err(CatalogError::Config(
                "database.store_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
