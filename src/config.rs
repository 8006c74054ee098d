use std::net::SocketAddr;
use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::trace;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

/// API server configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Optional bearer token required on every request
    pub auth_token: Option<String>,

    /// Enable CORS for the monitor dashboard
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_token: None,
            enable_cors: default_enable_cors(),
        }
    }
}

impl ApiConfig {
    /// Apply `HUB_ADDR`, `HUB_PORT` and `HUB_SECRET` on top of the file values
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(addr) = crate::util::get_addr() {
            self.bind.set_ip(addr);
        }
        if let Some(port) = crate::util::get_port() {
            self.bind.set_port(port);
        }
        if let Some(secret) = crate::util::get_secret() {
            self.auth_token = Some(secret);
        }
        self
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(crate::util::DEFAULT_ADDR, crate::util::DEFAULT_PORT)
}

fn default_enable_cors() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Notifications {
    pub webhook: Option<Webhook>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite at ./monitoring.db)
    pub storage: Option<StorageConfig>,

    pub api: Option<ApiConfig>,

    #[serde(default)]
    pub notifications: Notifications,

    /// Runtime settings written on startup when not already stored
    #[serde(default)]
    pub settings: Map<String, Value>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
