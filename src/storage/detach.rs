use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::SharedConfig;
use crate::error::PrismResult;

use super::blob::BlobStore;
use super::models::{RecordFilter, RecordStats, RequestRecord};
use super::Repository;

/// Detaches large bodies into a [`BlobStore`] before persisting records,
/// leaving a rune-safe inline preview. Best-effort: on blob failures the
/// record is saved with the body intact.
///
/// Wrap the durable repository with this, then wrap with the async stage, so
/// blob writes happen on the worker rather than the proxy hot path.
pub struct DetachingRepository {
    inner: Arc<dyn Repository>,
    blobs: Arc<dyn BlobStore>,
    config: SharedConfig,
}

impl DetachingRepository {
    pub fn new(inner: Arc<dyn Repository>, blobs: Arc<dyn BlobStore>, config: SharedConfig) -> Self {
        Self {
            inner,
            blobs,
            config,
        }
    }
}

/// Truncate to at most `max_bytes` without splitting a multi-byte codepoint:
/// from the cap, walk back to the nearest char boundary.
fn truncate_utf8(s: &str, max_bytes: i64) -> String {
    if max_bytes <= 0 {
        return String::new();
    }
    let max = (max_bytes as usize).min(s.len());
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s[..cut].to_string()
}

#[async_trait]
impl Repository for DetachingRepository {
    async fn save(&self, record: &RequestRecord) -> PrismResult<()> {
        let logging = self.config.logging_snapshot();
        let detach_over = logging.detach_threshold();
        if detach_over <= 0 {
            return self.inner.save(record).await;
        }
        let preview_bytes = logging.preview_bytes();

        let mut record = record.clone();

        if record.request_body_ref.is_empty() && record.request_body.len() as i64 > detach_over {
            match self.blobs.put(record.request_body.as_bytes()) {
                Ok(blob_ref) => {
                    debug!(
                        "detached request body: {} bytes -> {}",
                        record.request_body.len(),
                        blob_ref
                    );
                    record.request_body_ref = blob_ref;
                    record.request_body = truncate_utf8(&record.request_body, preview_bytes);
                }
                Err(err) => warn!("blob put (request) failed: {}", err),
            }
        }

        if record.response_body_ref.is_empty() && record.response_body.len() as i64 > detach_over {
            match self.blobs.put(record.response_body.as_bytes()) {
                Ok(blob_ref) => {
                    debug!(
                        "detached response body: {} bytes -> {}",
                        record.response_body.len(),
                        blob_ref
                    );
                    record.response_body_ref = blob_ref;
                    record.response_body = truncate_utf8(&record.response_body, preview_bytes);
                }
                Err(err) => warn!("blob put (response) failed: {}", err),
            }
        }

        self.inner.save(&record).await
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

    async fn close(&self) -> PrismResult<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SharedConfig};
    use crate::storage::testutil::{MemBlobStore, MemRepository};

    fn config(detach_over: i64, preview: i64) -> SharedConfig {
        let mut cfg = Config::default();
        cfg.logging.detach_body_over_bytes = detach_over;
        cfg.logging.body_preview_bytes = Some(preview);
        SharedConfig::new(cfg)
    }

    #[tokio::test]
    async fn test_detaches_large_bodies_only() {
        let inner = Arc::new(MemRepository::new());
        let blobs = Arc::new(MemBlobStore::new());
        let repo = DetachingRepository::new(inner.clone(), blobs.clone(), config(8, 4));

        let record = RequestRecord {
            id: "id".to_string(),
            request_body: "0123456789".to_string(), // 10 bytes, over threshold
            response_body: "abcd".to_string(),      // 4 bytes, under threshold
            request_body_size: 10,
            ..RequestRecord::default()
        };
        repo.save(&record).await.unwrap();

        assert_eq!(blobs.put_count(), 1);
        assert_eq!(blobs.puts.lock().unwrap()[0], b"0123456789");

        let saved = inner.saved();
        assert_eq!(saved.len(), 1);
        assert!(!saved[0].request_body_ref.is_empty());
        assert_eq!(saved[0].request_body, "0123");
        assert_eq!(saved[0].request_body_size, 10);
        assert!(saved[0].response_body_ref.is_empty());
        assert_eq!(saved[0].response_body, "abcd");
    }

    #[tokio::test]
    async fn test_truncation_does_not_split_runes() {
        let inner = Arc::new(MemRepository::new());
        let blobs = Arc::new(MemBlobStore::new());
        // 4-byte preview would cut into the second 3-byte rune; the preview
        // must back off to a rune boundary.
        let repo = DetachingRepository::new(inner.clone(), blobs.clone(), config(1, 4));

        let full = "\u{4f60}\u{597d}\u{4e16}\u{754c}"; // 你好世界
        let record = RequestRecord {
            id: "id".to_string(),
            request_body: full.to_string(),
            ..RequestRecord::default()
        };
        repo.save(&record).await.unwrap();

        assert_eq!(blobs.put_count(), 1);
        assert_eq!(blobs.puts.lock().unwrap()[0], full.as_bytes());

        let saved = inner.saved();
        assert_eq!(saved[0].request_body, "\u{4f60}");
        assert!(saved[0].request_body.len() <= 4);
    }

    #[tokio::test]
    async fn test_disabled_detaching_passes_through() {
        let inner = Arc::new(MemRepository::new());
        let blobs = Arc::new(MemBlobStore::new());
        let repo = DetachingRepository::new(inner.clone(), blobs.clone(), config(-1, 4));

        let record = RequestRecord {
            id: "id".to_string(),
            request_body: "x".repeat(1024),
            ..RequestRecord::default()
        };
        repo.save(&record).await.unwrap();

        assert_eq!(blobs.put_count(), 0);
        assert_eq!(inner.saved()[0].request_body.len(), 1024);
        assert!(inner.saved()[0].request_body_ref.is_empty());
    }

    #[tokio::test]
    async fn test_blob_failure_keeps_body_inline() {
        let inner = Arc::new(MemRepository::new());
        let blobs = Arc::new(MemBlobStore::failing());
        let repo = DetachingRepository::new(inner.clone(), blobs.clone(), config(8, 4));

        let record = RequestRecord {
            id: "id".to_string(),
            request_body: "0123456789".to_string(),
            ..RequestRecord::default()
        };
        repo.save(&record).await.unwrap();

        // Degraded mode: the record still lands with the full inline body.
        let saved = inner.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].request_body, "0123456789");
        assert!(saved[0].request_body_ref.is_empty());
    }

    #[tokio::test]
    async fn test_existing_ref_is_not_redetached() {
        let inner = Arc::new(MemRepository::new());
        let blobs = Arc::new(MemBlobStore::new());
        let repo = DetachingRepository::new(inner.clone(), blobs.clone(), config(8, 4));

        let record = RequestRecord {
            id: "id".to_string(),
            request_body: "0123456789".to_string(),
            request_body_ref: format!("sha256:{}", "f".repeat(64)),
            ..RequestRecord::default()
        };
        repo.save(&record).await.unwrap();

        assert_eq!(blobs.put_count(), 0);
    }

    #[test]
    fn test_truncate_utf8_bounds() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
        assert_eq!(truncate_utf8("hello", 3), "hel");
        assert_eq!(truncate_utf8("hello", 0), "");
        assert_eq!(truncate_utf8("\u{4f60}\u{597d}", 4), "\u{4f60}");
        assert_eq!(truncate_utf8("\u{4f60}\u{597d}", 6), "\u{4f60}\u{597d}");
    }
}
