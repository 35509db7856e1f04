use std::collections::{HashMap, HashSet};

use hyper::header::HeaderMap;

/// RFC 7230, section 6.1.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Media types that indicate a streaming response.
const STREAMING_MEDIA_TYPES: &[&str] = &[
    "text/event-stream",
    "application/x-ndjson",
    "application/stream+json",
    "application/json-seq",
];

pub fn is_hop_by_hop_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP_HEADERS.contains(&lower.as_str())
}

/// Tokens listed in the `Connection` header are hop-by-hop too.
fn connection_tokens(headers: &HeaderMap) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for value in headers.get_all(hyper::header::CONNECTION) {
        if let Ok(value) = value.to_str() {
            for token in value.split(',') {
                let token = token.trim().to_ascii_lowercase();
                if !token.is_empty() {
                    tokens.insert(token);
                }
            }
        }
    }
    tokens
}

/// Copy all end-to-end headers from `src` into `dst`, dropping the RFC 7230
/// hop-by-hop set plus anything named by the `Connection` header.
pub fn copy_end_to_end_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    let connection = connection_tokens(src);
    for (name, value) in src.iter() {
        if is_hop_by_hop_header(name.as_str()) || connection.contains(name.as_str()) {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
}

/// Flatten headers to a single value per key (the first), masking configured
/// sensitive keys. Only the captured copy is masked; forwarded headers are
/// untouched.
pub fn sanitize_headers(headers: &HeaderMap, sensitive: &[String]) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for name in headers.keys() {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let mut value = value.to_string();
        if sensitive
            .iter()
            .any(|s| s.eq_ignore_ascii_case(name.as_str()))
        {
            value = mask_value(&value);
        }
        result.insert(name.as_str().to_string(), value);
    }
    result
}

/// Flatten headers to a single value per key without masking.
pub fn header_first_values(headers: &HeaderMap) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for name in headers.keys() {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            result.insert(name.as_str().to_string(), value.to_string());
        }
    }
    result
}

fn mask_value(value: &str) -> String {
    if value.len() > 10 {
        format!("{}***{}", &value[..5], &value[value.len() - 3..])
    } else {
        "***".to_string()
    }
}

/// Whether a response should be forwarded chunk-by-chunk. True when the
/// Content-Type names a known streaming media type or the upstream sent
/// `X-Accel-Buffering: no`.
pub fn is_streaming(headers: &HeaderMap) -> bool {
    if let Some(content_type) = headers
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if STREAMING_MEDIA_TYPES.contains(&media_type.as_str()) {
            return true;
        }
        // Fallback: raw substring check for odd Content-Type values.
        let lower = content_type.to_ascii_lowercase();
        if STREAMING_MEDIA_TYPES.iter().any(|t| lower.contains(t)) {
            return true;
        }
    }

    // Commonly set by Nginx or upstream proxies to disable buffering.
    headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("no"))
        .unwrap_or(false)
}
