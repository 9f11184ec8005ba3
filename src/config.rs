//! Configuration module for Pingboard.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pingboard.db")
    pub db_path: String,
    /// How long a computed status view is served from cache (default: 30s)
    pub status_cache_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pingboard.db".to_string(),
            status_cache_ttl: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGBOARD_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PINGBOARD_DB_PATH`: Database file path (default: "pingboard.db")
    /// - `PINGBOARD_STATUS_CACHE_TTL_SECS`: Status cache TTL in seconds (default: 30)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("PINGBOARD_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("PINGBOARD_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = lookup("PINGBOARD_STATUS_CACHE_TTL_SECS").and_then(|s| s.parse().ok()) {
            cfg.status_cache_ttl = Duration::from_secs(secs);
        }

        cfg
    }
}
