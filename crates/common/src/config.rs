use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{MixgateError, MixgateResult};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin: AdminConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen: default_admin_listen(),
        }
    }
}

/// Per-project hourly throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum metered calls a non-premium project may make between two
    /// top-of-hour resets.
    #[serde(default = "default_calls_per_hour")]
    pub calls_per_hour: u64,
    /// Upper bound on a single admission round trip to the counter store.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Run the hourly reset job inside this process.
    #[serde(default = "default_true")]
    pub reset_enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_hour: default_calls_per_hour(),
            store_timeout_ms: default_store_timeout_ms(),
            reset_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default = "default_forwarder_endpoint")]
    pub endpoint: String,
    /// Alternative base URLs keyed by a project's data center.
    #[serde(default)]
    pub regions: HashMap<String, String>,
    #[serde(default = "default_forwarder_timeout")]
    pub timeout_secs: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_forwarder_endpoint(),
            regions: HashMap::new(),
            timeout_secs: default_forwarder_timeout(),
        }
    }
}

impl ForwarderConfig {
    /// Base URL for a project, falling back to the default endpoint when the
    /// data center is unset or unknown.
    pub fn endpoint_for(&self, data_center: Option<&str>) -> &str {
        data_center
            .and_then(|dc| self.regions.get(dc))
            .map(String::as_str)
            .unwrap_or(&self.endpoint)
    }
}

// Default value helpers
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_true() -> bool {
    true
}
fn default_calls_per_hour() -> u64 {
    50
}
fn default_store_timeout_ms() -> u64 {
    2_000
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::Memory
}
fn default_forwarder_endpoint() -> String {
    "https://api.mixpanel.com".to_string()
}
fn default_forwarder_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> MixgateResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML document.
    pub fn from_yaml(content: &str) -> MixgateResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> MixgateResult<()> {
        if self.server.listen.trim().is_empty() {
            return Err(MixgateError::Config(
                "server.listen must not be empty".to_string(),
            ));
        }
        if self.server.admin.listen.trim().is_empty() {
            return Err(MixgateError::Config(
                "server.admin.listen must not be empty".to_string(),
            ));
        }
        if self.rate_limit.calls_per_hour == 0 {
            return Err(MixgateError::Config(
                "rate_limit.calls_per_hour must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.store_timeout_ms == 0 {
            return Err(MixgateError::Config(
                "rate_limit.store_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            return Err(MixgateError::Config(
                "storage.path is required for the sqlite backend".to_string(),
            ));
        }
        if self.forwarder.endpoint.trim().is_empty() {
            return Err(MixgateError::Config(
                "forwarder.endpoint must not be empty".to_string(),
            ));
        }
        for (region, url) in &self.forwarder.regions {
            if url.trim().is_empty() {
                return Err(MixgateError::Config(format!(
                    "forwarder.regions.{} has an empty URL",
                    region
                )));
            }
        }

        tracing::debug!(
            calls_per_hour = self.rate_limit.calls_per_hour,
            backend = ?self.storage.backend,
            "configuration validated"
        );
        Ok(())
    }
}
