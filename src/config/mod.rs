/// Configuration management for the Zilliance workflow engine
///
/// Handles server binding, database location, and engine runtime parameters.
/// Every value can be overridden through environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Execution engine configuration
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the database file (default: "data")
    pub data_dir: String,
    /// Database file name inside `data_dir` (default: "zilliance.db")
    pub file_name: String,
}

impl DatabaseConfig {
    /// Full path of the SQLite database file
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.file_name)
    }
}

/// Runtime parameters for workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default timeout for http_request nodes in milliseconds
    pub http_timeout_ms: u64,
    /// Default page size for execution history queries
    pub history_limit: i64,
}

impl EngineConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: 30_000,
            history_limit: 20,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let engine_defaults = EngineConfig::default();
        Self {
            server: ServerConfig {
                host: std::env::var("ZILLIANCE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("ZILLIANCE_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("ZILLIANCE_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                file_name: "zilliance.db".to_string(),
            },
            engine: EngineConfig {
                http_timeout_ms: env_or("ZILLIANCE_HTTP_TIMEOUT_MS", engine_defaults.http_timeout_ms),
                history_limit: env_or("ZILLIANCE_HISTORY_LIMIT", engine_defaults.history_limit),
            },
        }
    }
}
