//! Configuration loading and types for hubdav.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, credential parsing, the remote object store,
//! logging, and metrics.  Every field has a default, so an empty file
//! yields a working local-disk gateway.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Credential parsing settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Remote object store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (Prometheus metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Prometheus metrics are recorded when `metrics` is on; they are scraped
/// from a dedicated listener so the DAV path space stays untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Address of the scrape listener (e.g. `127.0.0.1:9100`).  Metrics
    /// are still recorded without one, just not exported.
    #[serde(default)]
    pub metrics_bind: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_bind: None,
        }
    }
}

/// Credential settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Collection used when the username carries no `/collection` part.
    #[serde(default = "default_collection")]
    pub default_collection: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_collection: default_collection(),
        }
    }
}

/// Remote object store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Store type: `memory`, `local`, or `hub`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Upper bound on concurrent store calls.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// Hub API configuration.
    #[serde(default)]
    pub hub: HubConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            max_workers: default_max_workers(),
            local: LocalStorageConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory holding `<owner>/<collection>/...` trees.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Hub-style dataset API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Base URL of the hub.
    #[serde(default = "default_hub_endpoint")]
    pub endpoint: String,

    /// Repository kind in API paths: `datasets`, `models`, or `spaces`.
    #[serde(default = "default_repo_type")]
    pub repo_type: String,

    /// Branch or commit every read and write targets.
    #[serde(default = "default_revision")]
    pub revision: String,

    /// Lifetime of cached directory listings (0 disables the cache).
    #[serde(default = "default_listing_ttl")]
    pub listing_ttl_secs: u64,

    /// Per-request timeout.
    #[serde(default = "default_hub_timeout")]
    pub timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_hub_endpoint(),
            repo_type: default_repo_type(),
            revision: default_revision(),
            listing_ttl_secs: default_listing_ttl(),
            timeout_secs: default_hub_timeout(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7860
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_collection() -> String {
    "default".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_max_workers() -> usize {
    64
}

fn default_storage_root() -> String {
    "./data/collections".to_string()
}

fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_repo_type() -> String {
    "datasets".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_listing_ttl() -> u64 {
    10
}

fn default_hub_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
