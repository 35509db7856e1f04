//! Configuration for the PrismCat proxy.
//!
//! Configuration is a TOML file with four sections: `server`, `upstreams`,
//! `logging` (capture caps and masking), and `storage`. Absent keys take
//! built-in defaults, and a handful of `PRISMCAT_*` environment variables
//! override file values for containerized deployments.
//!
//! Handlers never read the live configuration directly: they take a by-value
//! snapshot through [`SharedConfig`] at entry, so admin-surface mutations
//! cannot split the behavior of an in-flight request.

pub mod logging;
pub mod server;
pub mod storage;
pub mod upstreams;

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use logging::LoggingConfig;
pub use server::ServerConfig;
pub use storage::StorageConfig;
pub use upstreams::UpstreamConfig;

/// Default configuration written when no config file exists yet.
const DEFAULT_CONFIG: &str = r#"[server]
bind = "0.0.0.0"
port = 8080
ui_hosts = ["localhost", "127.0.0.1"]
proxy_domains = ["localhost"]

# [upstreams.openai]
# target = "https://api.openai.com"
# timeout = 120

[logging]
max_request_body = 1048576      # 1MB
max_response_body = 10485760    # 10MB
sensitive_headers = ["authorization", "x-api-key", "api-key"]
detach_body_over_bytes = 262144 # 256KB
body_preview_bytes = 4096       # 4KB

[storage]
database = "data/prismcat.db"
blob_dir = "data/blobs"
retention_days = 7
"#;

/// PrismCat main configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    /// Named upstream targets; names are lower-cased on load and must be
    /// unique case-insensitively.
    pub upstreams: HashMap<String, UpstreamConfig>,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file, apply defaults and environment
    /// overrides, and validate.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let mut config: Config = toml::from_str(&content)?;

        config.normalize()?;
        config.apply_env_overrides();
        config.validate()?;

        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Write the built-in default configuration to `path` when it does not
    /// exist yet, creating parent directories as needed.
    pub async fn bootstrap<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, DEFAULT_CONFIG).await?;
        info!("Wrote default configuration to {:?}", path);
        Ok(())
    }

    /// Lower-case upstream names and reject case-insensitive duplicates.
    fn normalize(&mut self) -> Result<()> {
        let mut normalized = HashMap::with_capacity(self.upstreams.len());
        for (name, upstream) in self.upstreams.drain() {
            let lower = name.trim().to_ascii_lowercase();
            if lower.is_empty() {
                return Err(anyhow::anyhow!("Upstream name cannot be empty"));
            }
            if normalized.insert(lower.clone(), upstream).is_some() {
                return Err(anyhow::anyhow!(
                    "Duplicate upstream name (case-insensitive): {:?}",
                    lower
                ));
            }
        }
        self.upstreams = normalized;
        Ok(())
    }

    /// Environment overrides take precedence over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("PRISMCAT_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(hosts) = env::var("PRISMCAT_UI_HOSTS") {
            let hosts = split_csv(&hosts);
            if !hosts.is_empty() {
                self.server.ui_hosts = hosts;
            }
        }
        if let Ok(domains) = env::var("PRISMCAT_PROXY_DOMAINS") {
            let domains = split_csv(&domains);
            if !domains.is_empty() {
                self.server.proxy_domains = domains;
            }
        }
        if let Ok(db) = env::var("PRISMCAT_DB_PATH") {
            if !db.is_empty() {
                self.storage.database = db;
            }
        }
        if let Ok(dir) = env::var("PRISMCAT_BLOB_DIR") {
            if !dir.is_empty() {
                self.storage.blob_dir = dir;
            }
        }
        if let Ok(days) = env::var("PRISMCAT_RETENTION_DAYS") {
            if let Ok(days) = days.parse() {
                self.storage.retention_days = days;
            }
        }
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.logging.validate()?;
        self.storage.validate()?;
        for (name, upstream) in &self.upstreams {
            upstream.validate(name)?;
        }
        Ok(())
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shared, reloadable configuration handle.
///
/// Readers take consistent by-value snapshots; writers apply closures under
/// the exclusive lock. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Snapshot of the server section.
    pub fn server_snapshot(&self) -> ServerConfig {
        self.inner.read().expect("config lock poisoned").server.clone()
    }

    /// Snapshot of the capture section.
    pub fn logging_snapshot(&self) -> LoggingConfig {
        self.inner.read().expect("config lock poisoned").logging.clone()
    }

    /// Snapshot of the storage section.
    pub fn storage_snapshot(&self) -> StorageConfig {
        self.inner.read().expect("config lock poisoned").storage.clone()
    }

    /// Look up an upstream by (lower-cased) name.
    pub fn upstream(&self, name: &str) -> Option<UpstreamConfig> {
        self.inner
            .read()
            .expect("config lock poisoned")
            .upstreams
            .get(name)
            .cloned()
    }

    /// Copy of the upstream map for safe iteration.
    pub fn list_upstreams(&self) -> HashMap<String, UpstreamConfig> {
        self.inner
            .read()
            .expect("config lock poisoned")
            .upstreams
            .clone()
    }

    /// Whether `host` (port ignored) is served by the admin console.
    pub fn is_ui_host(&self, host: &str) -> bool {
        let guard = self.inner.read().expect("config lock poisoned");
        crate::routing::is_ui_host(host, &guard.server.ui_hosts)
    }

    /// Apply an in-place update under the exclusive lock.
    pub fn update<F: FnOnce(&mut Config)>(&self, f: F) {
        let mut guard = self.inner.write().expect("config lock poisoned");
        f(&mut guard);
    }

    /// Add or replace an upstream entry.
    pub fn add_upstream(&self, name: &str, upstream: UpstreamConfig) {
        let name = name.trim().to_ascii_lowercase();
        self.update(|cfg| {
            cfg.upstreams.insert(name, upstream);
        });
    }

    /// Remove an upstream entry.
    pub fn remove_upstream(&self, name: &str) {
        let name = name.trim().to_ascii_lowercase();
        self.update(|cfg| {
            cfg.upstreams.remove(&name);
        });
    }
}
