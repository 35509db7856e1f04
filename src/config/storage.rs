use serde::{Deserialize, Serialize};

/// Persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub database: String,
    /// Directory for the content-addressed blob store.
    pub blob_dir: String,
    /// Delete records older than this many days. 0 disables retention.
    pub retention_days: i64,
    /// Capacity of the async save queue. 0 uses the 1024 default.
    pub async_buffer: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: "./data/prismcat.db".to_string(),
            blob_dir: "./data/blobs".to_string(),
            retention_days: 0,
            async_buffer: 0,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.is_empty() {
            return Err(anyhow::anyhow!("Storage database path cannot be empty"));
        }
        if self.blob_dir.is_empty() {
            return Err(anyhow::anyhow!("Storage blob directory cannot be empty"));
        }
        Ok(())
    }
}
