//! Persistence for request records: a durable SQLite table wrapped by a
//! detaching stage (oversized bodies move to a content-addressed blob store)
//! wrapped by an async stage (bounded queue, single writer).
//!
//! Construction is bottom-up (`Sqlite <- Detaching <- Async`); teardown is
//! top-down, closing the async stage first so the queue drains into the inner
//! sinks before they close.

pub mod async_repo;
pub mod blob;
pub mod blob_fs;
pub mod detach;
pub mod models;
pub mod retention;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PrismResult;

pub use async_repo::AsyncRepository;
pub use blob::BlobStore;
pub use blob_fs::FileBlobStore;
pub use detach::DetachingRepository;
pub use models::{RecordFilter, RecordStats, RequestRecord};
pub use retention::RetentionTask;
pub use sqlite::SqliteRepository;

/// Store of request records.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert or replace a record by id.
    async fn save(&self, record: &RequestRecord) -> PrismResult<()>;

    /// Fetch a full record.
    async fn get(&self, id: &str) -> PrismResult<Option<RequestRecord>>;

    /// List summary projections matching `filter` plus the total count under
    /// the same predicate.
    async fn list(&self, filter: &RecordFilter) -> PrismResult<(Vec<RequestRecord>, i64)>;

    /// Delete records created before `before`; returns the count removed.
    async fn delete_before(&self, before: DateTime<Utc>) -> PrismResult<i64>;

    /// Aggregate statistics, optionally restricted to records since a time.
    async fn stats(&self, since: Option<DateTime<Utc>>) -> PrismResult<RecordStats>;

    /// Release underlying resources. Wrappers close inner repositories.
    async fn close(&self) -> PrismResult<()>;
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::PrismError;

    /// In-memory repository used as the inner sink in stage tests.
    pub struct MemRepository {
        pub records: Mutex<Vec<RequestRecord>>,
        pub closed: Mutex<bool>,
        /// When gated, saves wait for permits added to this semaphore.
        pub gate: tokio::sync::Semaphore,
        gated: AtomicUsize,
    }

    impl MemRepository {
        pub fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                closed: Mutex::new(false),
                gate: tokio::sync::Semaphore::new(0),
                gated: AtomicUsize::new(0),
            }
        }

        /// A repository whose saves block until permits are added to `gate`.
        pub fn gated() -> Self {
            Self {
                gated: AtomicUsize::new(1),
                ..Self::new()
            }
        }

        pub fn saved(&self) -> Vec<RequestRecord> {
            self.records.lock().unwrap().clone()
        }

        pub fn saved_count(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Repository for MemRepository {
        async fn save(&self, record: &RequestRecord) -> PrismResult<()> {
            if self.gated.load(Ordering::SeqCst) != 0 {
                let permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|_| PrismError::internal("gate closed"))?;
                permit.forget();
            }
            if *self.closed.lock().unwrap() {
                return Err(PrismError::internal("repository closed"));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn get(&self, id: &str) -> PrismResult<Option<RequestRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == id)
                .cloned())
        }

        async fn list(&self, _filter: &RecordFilter) -> PrismResult<(Vec<RequestRecord>, i64)> {
            let records = self.records.lock().unwrap().clone();
            let total = records.len() as i64;
            Ok((records, total))
        }

        async fn delete_before(&self, before: DateTime<Utc>) -> PrismResult<i64> {
            let mut records = self.records.lock().unwrap();
            let len_before = records.len();
            records.retain(|r| r.created_at >= before);
            Ok((len_before - records.len()) as i64)
        }

        async fn stats(&self, _since: Option<DateTime<Utc>>) -> PrismResult<RecordStats> {
            Ok(RecordStats::default())
        }

        async fn close(&self) -> PrismResult<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    /// Blob store double that records puts and returns a fixed ref.
    #[derive(Default)]
    pub struct MemBlobStore {
        pub puts: Mutex<Vec<Vec<u8>>>,
        pub fail: AtomicUsize,
    }

    impl MemBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail: AtomicUsize::new(1),
                ..Self::default()
            }
        }

        pub fn put_count(&self) -> usize {
            self.puts.lock().unwrap().len()
        }
    }

    impl BlobStore for MemBlobStore {
        fn put(&self, data: &[u8]) -> PrismResult<String> {
            if self.fail.load(Ordering::SeqCst) != 0 {
                return Err(PrismError::file_system("blob store unavailable"));
            }
            self.puts.lock().unwrap().push(data.to_vec());
            Ok(format!("sha256:{}", "0".repeat(64)))
        }

        fn get(&self, _blob_ref: &str) -> PrismResult<Vec<u8>> {
            Err(PrismError::BlobNotFound)
        }

        fn exists(&self, _blob_ref: &str) -> PrismResult<bool> {
            Ok(false)
        }
    }
}
