/// Configuration management for the Restwright server
///
/// Handles the bind address, default database binding values, where automation
/// definitions are loaded from, auth enforcement and runtime limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Defaults for automation database bindings
    pub database: DatabaseConfig,
    /// Where automation definitions live
    pub definitions: DefinitionsConfig,
    /// Endpoint authentication
    pub auth: AuthConfig,
    pub runtime: RuntimeConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Default values merged into `db_config` when a definition leaves them out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Default connection string (`DATABASE_URL`)
    pub url: Option<String>,
    /// Default database name
    pub name: String,
    /// Directory holding `{database}.db` files
    pub data_dir: String,
}

/// Definition store selection. A blob store wins over a SQLite store, which
/// wins over the directory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionsConfig {
    pub directory: String,
    pub blob_url: Option<String>,
    #[serde(skip_serializing)]
    pub blob_token: Option<String>,
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Master switch; can only turn endpoint-level enforcement off
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    pub jwt_algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Deadline for a single storage operation
    pub backend_timeout_ms: u64,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl RuntimeConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("RESTWRIGHT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("RESTWRIGHT_PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .unwrap_or(8000),
            },
            database: DatabaseConfig {
                url: env_opt("DATABASE_URL"),
                name: std::env::var("DATABASE_NAME").unwrap_or_else(|_| "council_db".to_string()),
                data_dir: std::env::var("RESTWRIGHT_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            definitions: DefinitionsConfig {
                directory: std::env::var("AUTOMATION_STORAGE_DIR")
                    .unwrap_or_else(|_| "data/automations".to_string()),
                blob_url: env_opt("BLOB_STORE_URL"),
                blob_token: env_opt("BLOB_READ_WRITE_TOKEN"),
                database_url: env_opt("DEFINITIONS_DATABASE_URL"),
            },
            auth: AuthConfig {
                enabled: std::env::var("AUTH_ENABLED")
                    .map(|v| parse_flag(&v))
                    .unwrap_or(true),
                jwt_secret: env_opt("JWT_SECRET_KEY"),
                jwt_algorithm: std::env::var("JWT_ALGORITHM").unwrap_or_else(|_| "HS256".to_string()),
            },
            runtime: RuntimeConfig {
                backend_timeout_ms: std::env::var("BACKEND_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        }
    }
}

/// Unset and empty variables are both treated as absent
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}
