use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{PrismError, PrismResult};

use super::models::{RecordFilter, RecordStats, RequestRecord};
use super::Repository;

const DEFAULT_BUFFER: usize = 1024;

/// Makes `save` best-effort and asynchronous behind a bounded queue; all
/// other operations hit the inner repository synchronously.
///
/// Exactly one worker drains the queue: the durable table serializes writes
/// anyway, and FIFO delivery preserves the initial-before-finalized order for
/// any single record id. Enqueueing never blocks; when the queue is full the
/// record is dropped and counted.
pub struct AsyncRepository {
    inner: Arc<dyn Repository>,
    /// Primary sender handle. `save` clones it; `close` takes it. The channel
    /// closes once the last in-flight clone drops, so a send can never race a
    /// close into a panic.
    tx: Mutex<Option<mpsc::Sender<RequestRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl AsyncRepository {
    pub fn new(inner: Arc<dyn Repository>, buffer: usize) -> Self {
        let buffer = if buffer == 0 { DEFAULT_BUFFER } else { buffer };
        let (tx, mut rx) = mpsc::channel::<RequestRecord>(buffer);

        let worker_inner = Arc::clone(&inner);
        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(err) = worker_inner.save(&record).await {
                    // Best-effort: the proxy path must never crash over this.
                    warn!("save request record failed: {}", err);
                    metrics::counter!("prismcat_record_save_errors_total").increment(1);
                }
            }
        });

        Self {
            inner,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Number of records dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Repository for AsyncRepository {
    async fn save(&self, record: &RequestRecord) -> PrismResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PrismError::QueueClosed);
        }

        let tx = {
            let guard = self.tx.lock().expect("queue lock poisoned");
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(PrismError::QueueClosed),
            }
        };

        // The caller may keep mutating its copy after save returns.
        match tx.try_send(record.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("prismcat_record_queue_dropped_total").increment(1);
                Err(PrismError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PrismError::QueueClosed),
        }
    }

    async fn get(&self, id: &str) -> PrismResult<Option<RequestRecord>> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &RecordFilter) -> PrismResult<(Vec<RequestRecord>, i64)> {
        self.inner.list(filter).await
    }

    async fn delete_before(&self, before: DateTime<Utc>) -> PrismResult<i64> {
        self.inner.delete_before(before).await
    }

    async fn stats(&self, since: Option<DateTime<Utc>>) -> PrismResult<RecordStats> {
        self.inner.stats(since).await
    }

    /// Reject further saves, drain the queue, then close the inner
    /// repository. Loses only records that were dropped by back-pressure.
    async fn close(&self) -> PrismResult<()> {
        self.closed.store(true, Ordering::SeqCst);

        // Drop the primary sender; the worker exits once the queue drains and
        // any in-flight clones are gone.
        let tx = self.tx.lock().expect("queue lock poisoned").take();
        drop(tx);

        let worker = self.worker.lock().expect("queue lock poisoned").take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!("record queue worker panicked: {}", err);
            }
        }

        self.inner.close().await
    }
}
