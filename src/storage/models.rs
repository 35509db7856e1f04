use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One log record per inbound proxied request.
///
/// Empty strings stand for "absent" (ids, refs, errors); `status_code == 0`
/// with an empty `error` marks an in-flight record, with a non-empty `error`
/// a request that failed before response headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,

    /// Upstream name resolved from the Host header.
    pub upstream: String,
    /// The upstream URL actually dispatched.
    pub target_url: String,

    pub method: String,
    pub path: String,
    pub query: String,
    pub request_headers: HashMap<String, String>,
    /// Inline body preview; the full payload may live behind
    /// `request_body_ref` in the blob store.
    pub request_body: String,
    pub request_body_ref: String,
    /// Bytes observed by the capture, not the inline preview length.
    pub request_body_size: i64,

    pub status_code: u16,
    pub response_headers: HashMap<String, String>,
    pub response_body: String,
    pub response_body_ref: String,
    pub response_body_size: i64,

    pub streaming: bool,
    pub latency_ms: i64,
    pub error: String,
    /// True when any capture or preview hit its cap.
    pub truncated: bool,
    /// Value of the X-PrismCat-Tag request header, if present.
    pub tag: String,
}

impl Default for RequestRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            created_at: DateTime::UNIX_EPOCH,
            upstream: String::new(),
            target_url: String::new(),
            method: String::new(),
            path: String::new(),
            query: String::new(),
            request_headers: HashMap::new(),
            request_body: String::new(),
            request_body_ref: String::new(),
            request_body_size: 0,
            status_code: 0,
            response_headers: HashMap::new(),
            response_body: String::new(),
            response_body_ref: String::new(),
            response_body_size: 0,
            streaming: false,
            latency_ms: 0,
            error: String::new(),
            truncated: false,
            tag: String::new(),
        }
    }
}

/// Conjunctive filter for record listing.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub upstream: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<u16>,
    /// Case-sensitive substring match on the path.
    pub path: Option<String>,
    pub tag: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub has_error: Option<bool>,
    pub streaming: Option<bool>,

    pub offset: i64,
    /// Clamped to [1, 1000]; 0 means the default of 50.
    pub limit: i64,
}

/// Aggregate statistics over the log table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordStats {
    pub total_requests: i64,
    /// 2xx and 3xx responses.
    pub success_count: i64,
    /// Rows with an error or a status >= 400.
    pub error_count: i64,
    pub streaming_count: i64,
    pub avg_latency_ms: f64,
    pub by_upstream: HashMap<String, i64>,
    pub by_status_code: HashMap<u16, i64>,
}
