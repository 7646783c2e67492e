use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mixgate_common::{AppConfig, StorageBackend};
use mixgate_rate_limit::{CounterStore, MemoryCounterStore, SqliteCounterStore};
use tracing::{info, warn};

/// Resolved configuration with the path it was read from.
pub struct ProxyConfig {
    pub config: AppConfig,
    pub config_path: PathBuf,
}

impl ProxyConfig {
    pub fn load(path: &str) -> Result<Self> {
        info!(path = path, "loading configuration");
        let config =
            AppConfig::load(path).with_context(|| format!("failed to load config from {}", path))?;
        Ok(Self {
            config,
            config_path: PathBuf::from(path),
        })
    }

    /// Open the counter store selected by `storage.backend`.
    pub fn counter_store(&self) -> Result<Arc<dyn CounterStore>> {
        let storage = &self.config.storage;
        match storage.backend {
            StorageBackend::Memory => {
                warn!("using in-memory counter store; counters are lost on restart");
                Ok(Arc::new(MemoryCounterStore::new()))
            }
            StorageBackend::Sqlite => {
                let path = storage
                    .path
                    .as_deref()
                    .context("storage.path is required for the sqlite backend")?;
                info!(path = %path.display(), "opening sqlite counter store");
                let store = SqliteCounterStore::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                Ok(Arc::new(store))
            }
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.config.rate_limit.store_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("mixgate.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn memory_backend_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "rate_limit:\n  store_timeout_ms: 250\n");
        let cfg = ProxyConfig::load(&path).unwrap();
        assert_eq!(cfg.store_timeout(), Duration::from_millis(250));
        assert!(cfg.counter_store().is_ok());
    }

    #[tokio::test]
    async fn sqlite_backend_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("data").join("counters.db");
        let path = write_config(
            &dir,
            &format!("storage:\n  backend: sqlite\n  path: {}\n", db.display()),
        );
        let cfg = ProxyConfig::load(&path).unwrap();
        let store = cfg.counter_store().unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(db.exists());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ProxyConfig::load("/nonexistent/mixgate.yaml").is_err());
    }
}
