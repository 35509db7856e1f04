use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::SharedConfig;

use super::sqlite::SqliteRepository;
use super::{FileBlobStore, Repository};

/// Wake-up cadence for the retention loop.
const TICK: Duration = Duration::from_secs(60);
/// Log purge runs at most this often.
const PURGE_EVERY: Duration = Duration::from_secs(6 * 60 * 60);
/// Blob garbage collection runs at most this often.
const BLOB_GC_EVERY: Duration = Duration::from_secs(24 * 60 * 60);
/// Blobs younger than this are never collected; it covers the window between
/// a blob write and its log row reaching the durable table.
const BLOB_GC_MIN_AGE: Duration = Duration::from_secs(60 * 60);

/// Background task that purges old records and garbage-collects the blob
/// store on a slow cadence.
pub struct RetentionTask {
    handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl RetentionTask {
    /// Spawn the retention loop. Retention is re-read from the configuration
    /// on every tick, so runtime changes take effect without a restart.
    pub fn start(
        config: SharedConfig,
        repo: Arc<SqliteRepository>,
        blobs: Arc<FileBlobStore>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            let mut last_purge: Option<tokio::time::Instant> = None;
            let mut last_blob_gc: Option<tokio::time::Instant> = None;

            loop {
                interval.tick().await;
                let now = tokio::time::Instant::now();

                let retention_days = config.storage_snapshot().retention_days;
                if retention_days > 0 && due(last_purge, now, PURGE_EVERY) {
                    let before =
                        chrono::Utc::now() - chrono::Duration::days(retention_days);
                    match repo.delete_before(before).await {
                        Ok(deleted) if deleted > 0 => {
                            info!(
                                "deleted {} records older than {} days",
                                deleted, retention_days
                            );
                        }
                        Ok(_) => {}
                        Err(err) => error!("record retention cleanup failed: {}", err),
                    }
                    last_purge = Some(now);
                }

                if due(last_blob_gc, now, BLOB_GC_EVERY) {
                    match repo.list_blob_refs().await {
                        Ok(refs) => {
                            let blobs = Arc::clone(&blobs);
                            let result = tokio::task::spawn_blocking(move || {
                                blobs.garbage_collect(&refs, BLOB_GC_MIN_AGE)
                            })
                            .await;
                            match result {
                                Ok(Ok(deleted)) if deleted > 0 => {
                                    info!("deleted {} unreferenced blobs", deleted);
                                }
                                Ok(Ok(_)) => {}
                                Ok(Err(err)) => error!("blob GC failed: {}", err),
                                Err(err) => error!("blob GC task failed: {}", err),
                            }
                        }
                        Err(err) => error!("blob GC list refs failed: {}", err),
                    }
                    last_blob_gc = Some(now);
                }
            }
        });

        Self {
            handle: Arc::new(RwLock::new(Some(handle))),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .read()
            .expect("retention lock poisoned")
            .is_some()
    }

    /// Stop the loop. Safe to call more than once.
    pub async fn stop(&self) {
        let handle = self
            .handle
            .write()
            .expect("retention lock poisoned")
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("retention task stopped");
        }
    }
}

impl Drop for RetentionTask {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.handle.write() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

fn due(last: Option<tokio::time::Instant>, now: tokio::time::Instant, every: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.duration_since(last) >= every,
    }
}
