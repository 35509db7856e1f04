use std::convert::Infallible;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use hyper::body::HttpBody as _;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Body, HeaderMap, Request, Response, StatusCode, Uri};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SharedConfig;
use crate::routing::extract_subdomain;
use crate::storage::{Repository, RequestRecord};

use super::body::finalize_record;
use super::capture::BoundedCapture;
use super::headers::{copy_end_to_end_headers, header_first_values, is_streaming, sanitize_headers};
use super::http_client;

/// Request header captured into the record's tag field. Forwarded untouched;
/// upstreams ignore it.
pub const TAG_HEADER: &str = "x-prismcat-tag";

const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 120;

/// Handles host-based upstream routing and request/response logging.
///
/// One handler task per request; the hot path streams both bodies without
/// buffering while bounded captures accumulate a copy for the record.
#[derive(Clone)]
pub struct ProxyHandler {
    config: SharedConfig,
    repo: Arc<dyn Repository>,
    active: Arc<AtomicI64>,
}

/// Decrements the active-request gauge when the request's last task finishes.
struct ActiveGuard(Arc<AtomicI64>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProxyHandler {
    pub fn new(config: SharedConfig, repo: Arc<dyn Repository>) -> Self {
        Self {
            config,
            repo,
            active: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Requests (including their record finalizers) still in flight.
    pub fn active_requests(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        Ok(self.forward(req).await)
    }

    async fn forward(&self, req: Request<Body>) -> Response<Body> {
        let started = Instant::now();
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active));

        let server_cfg = self.config.server_snapshot();
        let logging_cfg = self.config.logging_snapshot();

        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();

        // Extract the upstream name from the host (openai.localhost -> openai).
        let Some(subdomain) = extract_subdomain(&host, &server_cfg.proxy_domains) else {
            return error_response(StatusCode::BAD_REQUEST, "invalid host: missing subdomain");
        };
        let Some(upstream) = self.config.upstream(&subdomain) else {
            return error_response(
                StatusCode::BAD_GATEWAY,
                &format!("unknown upstream: {}", subdomain),
            );
        };

        let target: Uri = match upstream.target.parse() {
            Ok(target) => target,
            Err(_) => {
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "invalid upstream config",
                )
            }
        };
        let Some(authority) = target.authority().cloned() else {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid upstream config");
        };
        let upstream_url = build_upstream_url(&target, req.uri());

        // Initial record (best-effort) so observers can see in-flight requests.
        let mut record = RequestRecord {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            upstream: subdomain.clone(),
            target_url: upstream_url.clone(),
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            query: req.uri().query().unwrap_or_default().to_string(),
            request_headers: sanitize_headers(req.headers(), &logging_cfg.sensitive_headers),
            tag: req
                .headers()
                .get(TAG_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            ..RequestRecord::default()
        };
        self.save_snapshot(&record).await;

        // Per-request deadline; client disconnect or expiry cancels the
        // outbound exchange. A shared client-wide timeout is never mutated.
        let timeout_secs = if upstream.timeout == 0 {
            DEFAULT_UPSTREAM_TIMEOUT_SECS
        } else {
            upstream.timeout
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);

        let req_capture = Arc::new(BoundedCapture::new(logging_cfg.max_request_body));

        let (parts, inbound_body) = req.into_parts();

        let mut out_headers = HeaderMap::new();
        copy_end_to_end_headers(&mut out_headers, &parts.headers);
        // Host is special: the upstream sees the target authority. The
        // inbound Content-Length survives the copy above, so hyper keeps the
        // original length semantics for the streamed body.
        match HeaderValue::from_str(authority.as_str()) {
            Ok(value) => {
                out_headers.insert(HOST, value);
            }
            Err(err) => {
                record.error = format!("create upstream request: bad host header: {}", err);
                finalize_record(&mut record, &req_capture, None, &logging_cfg, started);
                self.save_snapshot(&record).await;
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to create request",
                );
            }
        }

        // Tee the inbound body: bytes stream to the upstream while a bounded
        // capture keeps a copy for the record.
        let out_body = if inbound_body.is_end_stream() {
            Body::empty()
        } else {
            let (mut tx, out_body) = Body::channel();
            let capture = Arc::clone(&req_capture);
            let mut inbound = inbound_body;
            tokio::spawn(async move {
                while let Some(next) = inbound.data().await {
                    match next {
                        Ok(chunk) => {
                            capture.write(&chunk);
                            if tx.send_data(chunk).await.is_err() {
                                // Upstream stopped reading; nothing to do.
                                return;
                            }
                        }
                        Err(_) => {
                            tx.abort();
                            return;
                        }
                    }
                }
            });
            out_body
        };

        let out_uri: Uri = match upstream_url.parse() {
            Ok(uri) => uri,
            Err(err) => {
                record.error = format!("create upstream request: {}", err);
                finalize_record(&mut record, &req_capture, None, &logging_cfg, started);
                self.save_snapshot(&record).await;
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to create request",
                );
            }
        };
        let mut out_req = match Request::builder()
            .method(parts.method.clone())
            .uri(out_uri)
            .body(out_body)
        {
            Ok(out_req) => out_req,
            Err(err) => {
                record.error = format!("create upstream request: {}", err);
                finalize_record(&mut record, &req_capture, None, &logging_cfg, started);
                self.save_snapshot(&record).await;
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to create request",
                );
            }
        };
        *out_req.headers_mut() = out_headers;

        debug!("forwarding {} {} -> {}", record.method, record.path, upstream_url);

        let resp = match tokio::time::timeout_at(deadline, http_client::shared_client().request(out_req))
            .await
        {
            Err(_) => {
                record.error = format!(
                    "upstream request failed: timed out after {}s",
                    timeout_secs
                );
                metrics::counter!("prismcat_upstream_errors_total").increment(1);
                finalize_record(&mut record, &req_capture, None, &logging_cfg, started);
                self.save_snapshot(&record).await;
                return error_response(StatusCode::BAD_GATEWAY, "upstream error: request timed out");
            }
            Ok(Err(err)) => {
                record.error = format!("upstream request failed: {}", err);
                metrics::counter!("prismcat_upstream_errors_total").increment(1);
                finalize_record(&mut record, &req_capture, None, &logging_cfg, started);
                self.save_snapshot(&record).await;
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream error: {}", err),
                );
            }
            Ok(Ok(resp)) => resp,
        };

        record.status_code = resp.status().as_u16();
        record.response_headers = header_first_values(resp.headers());
        record.streaming = is_streaming(resp.headers());

        let (resp_parts, mut upstream_body) = resp.into_parts();
        let mut client_headers = HeaderMap::new();
        copy_end_to_end_headers(&mut client_headers, &resp_parts.headers);

        let resp_capture = Arc::new(BoundedCapture::new(logging_cfg.max_response_body));
        let (mut client_tx, client_body) = Body::channel();

        // Stream the upstream body to the client chunk by chunk (each chunk
        // is its own frame, so streaming responses flush as they arrive)
        // while the capture keeps a bounded copy. The record is finalized
        // once the body ends, errors, or the deadline expires.
        let repo = Arc::clone(&self.repo);
        let capture = Arc::clone(&resp_capture);
        let req_capture_done = Arc::clone(&req_capture);
        tokio::spawn(async move {
            let _guard = guard;
            loop {
                match tokio::time::timeout_at(deadline, upstream_body.data()).await {
                    Err(_) => {
                        record.error = format!(
                            "forward response failed: timed out after {}s",
                            timeout_secs
                        );
                        metrics::counter!("prismcat_upstream_errors_total").increment(1);
                        client_tx.abort();
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Ok(chunk))) => {
                        capture.write(&chunk);
                        if let Err(err) = client_tx.send_data(chunk).await {
                            // The response is already partially committed; we
                            // can only record the abort.
                            record.error = format!("forward response failed: {}", err);
                            metrics::counter!("prismcat_client_write_errors_total").increment(1);
                            break;
                        }
                    }
                    Ok(Some(Err(err))) => {
                        record.error = format!("forward response failed: {}", err);
                        metrics::counter!("prismcat_upstream_errors_total").increment(1);
                        client_tx.abort();
                        break;
                    }
                }
            }

            finalize_record(
                &mut record,
                &req_capture_done,
                Some(&capture),
                &logging_cfg,
                started,
            );
            if let Err(err) = repo.save(&record).await {
                warn!("save request record failed/dropped: {}", err);
            }
        });

        let mut response = Response::builder()
            .status(resp_parts.status)
            .body(client_body)
            .unwrap_or_else(|_| Response::new(Body::empty()));
        *response.headers_mut() = client_headers;
        response
    }

    /// Best-effort record write; failures never abort forwarding.
    async fn save_snapshot(&self, record: &RequestRecord) {
        if let Err(err) = self.repo.save(record).await {
            warn!("save request record failed/dropped: {}", err);
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Join the upstream target URL with the inbound path and query. The inbound
/// fragment never reaches a server, so there is nothing to drop on the wire.
fn build_upstream_url(base: &Uri, inbound: &Uri) -> String {
    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base.authority().map(|a| a.as_str()).unwrap_or_default();
    let path = single_joining_slash(base.path(), inbound.path());
    let query = merge_query(base.query().unwrap_or(""), inbound.query().unwrap_or(""));

    if query.is_empty() {
        format!("{}://{}{}", scheme, authority, path)
    } else {
        format!("{}://{}{}?{}", scheme, authority, path, query)
    }
}

fn merge_query(a: &str, b: &str) -> String {
    if a.is_empty() {
        return b.to_string();
    }
    if b.is_empty() {
        return a.to_string();
    }
    format!("{}&{}", a, b)
}

fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => {
            if a.is_empty() || b.is_empty() {
                format!("{}{}", a, b)
            } else {
                format!("{}/{}", a, b)
            }
        }
        _ => format!("{}{}", a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_upstream_url_joins_paths() {
        let base: Uri = "https://api.example.test".parse().unwrap();
        let inbound: Uri = "/v1/chat?stream=true".parse().unwrap();
        assert_eq!(
            build_upstream_url(&base, &inbound),
            "https://api.example.test/v1/chat?stream=true"
        );

        let base: Uri = "https://api.example.test/openai".parse().unwrap();
        let inbound: Uri = "/v1/chat".parse().unwrap();
        assert_eq!(
            build_upstream_url(&base, &inbound),
            "https://api.example.test/openai/v1/chat"
        );
    }

    #[test]
    fn test_build_upstream_url_merges_queries() {
        let base: Uri = "https://api.example.test/v1?key=abc".parse().unwrap();
        let inbound: Uri = "/chat?stream=true".parse().unwrap();
        assert_eq!(
            build_upstream_url(&base, &inbound),
            "https://api.example.test/v1/chat?key=abc&stream=true"
        );
    }

    #[test]
    fn test_single_joining_slash() {
        assert_eq!(single_joining_slash("/a/", "/b"), "/a/b");
        assert_eq!(single_joining_slash("/a", "/b"), "/a/b");
        assert_eq!(single_joining_slash("/a", "b"), "/a/b");
        assert_eq!(single_joining_slash("", "/b"), "/b");
        assert_eq!(single_joining_slash("/", "/b"), "/b");
    }

    #[test]
    fn test_error_response_shape() {
        let resp = error_response(StatusCode::BAD_GATEWAY, "unknown upstream: openai");
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
