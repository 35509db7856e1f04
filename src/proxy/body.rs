//! Record builder: turns captured bytes into the inline, display-friendly
//! view stored on a request record.
//!
//! Compressed captures are decompressed (bounded) before the text/binary
//! decision so users see readable payloads instead of gzip bytes. The cost is
//! CPU off the forwarding path; the hot path only ever appends to captures.

use std::collections::HashMap;
use std::io::Read;
use std::time::Instant;

use crate::config::LoggingConfig;
use crate::storage::RequestRecord;

use super::capture::BoundedCapture;

/// First value for a header key, tolerating map keys of any casing.
pub fn first_header_value<'a>(headers: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    if let Some(v) = headers.get(key) {
        return Some(v.as_str());
    }
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Finalize a record from both captures: body previews, byte counts, the
/// truncation disjunction, and latency.
pub fn finalize_record(
    record: &mut RequestRecord,
    req_capture: &BoundedCapture,
    resp_capture: Option<&BoundedCapture>,
    logging: &LoggingConfig,
    started: Instant,
) {
    record.request_body_size = req_capture.total();
    let content_type = first_header_value(&record.request_headers, "content-type");
    let content_encoding = first_header_value(&record.request_headers, "content-encoding");
    let (body, truncated) = body_preview(
        content_type,
        content_encoding,
        &req_capture.bytes(),
        logging.max_request_body,
    );
    record.request_body = body;
    record.truncated = record.truncated || truncated || req_capture.truncated();

    if let Some(resp_capture) = resp_capture {
        record.response_body_size = resp_capture.total();
        let content_type = first_header_value(&record.response_headers, "content-type");
        let content_encoding = first_header_value(&record.response_headers, "content-encoding");
        let (body, truncated) = body_preview(
            content_type,
            content_encoding,
            &resp_capture.bytes(),
            logging.max_response_body,
        );
        record.response_body = body;
        record.truncated = record.truncated || truncated || resp_capture.truncated();
    }

    record.latency_ms = started.elapsed().as_millis() as i64;
}

/// Convert captured bytes to a display string. Compressed payloads are
/// decompressed up to `max_output_bytes`; non-textual payloads collapse to a
/// short placeholder. Returns the preview and whether it was truncated.
pub fn body_preview(
    content_type: Option<&str>,
    content_encoding: Option<&str>,
    captured: &[u8],
    max_output_bytes: i64,
) -> (String, bool) {
    if captured.is_empty() {
        return (String::new(), false);
    }

    let mut data = captured.to_vec();
    let mut decompressed = false;
    let mut truncated = false;

    let encoding = content_encoding.unwrap_or("").trim().to_ascii_lowercase();
    let decoded = match encoding.as_str() {
        "gzip" => read_limited(flate2::read::GzDecoder::new(captured), max_output_bytes),
        "deflate" => read_limited(flate2::read::DeflateDecoder::new(captured), max_output_bytes),
        "br" => read_limited(
            brotli::Decompressor::new(captured, 4096),
            max_output_bytes,
        ),
        _ => None,
    };
    if let Some((bytes, hit_limit)) = decoded {
        data = bytes;
        decompressed = true;
        truncated = truncated || hit_limit;
    }

    if is_probably_text(content_type.unwrap_or("")) {
        if let Ok(text) = std::str::from_utf8(&data) {
            return (text.to_string(), truncated);
        }
    }
    // Payloads that decode as UTF-8 are shown even without a textual
    // Content-Type.
    if let Ok(text) = std::str::from_utf8(&data) {
        return (text.to_string(), truncated);
    }

    if decompressed {
        if truncated {
            return (
                format!(
                    "[binary content omitted; {} bytes after decompression (truncated)]",
                    data.len()
                ),
                true,
            );
        }
        return (
            format!(
                "[binary content omitted; {} bytes after decompression]",
                data.len()
            ),
            false,
        );
    }
    (
        format!("[binary content omitted; {} bytes captured]", captured.len()),
        false,
    )
}

/// Read up to `max` bytes from a decoder, detecting overflow with a one-byte
/// sentinel. `None` on any decode error (the raw capture is used instead).
fn read_limited<R: Read>(reader: R, max: i64) -> Option<(Vec<u8>, bool)> {
    if max <= 0 {
        return Some((Vec::new(), false));
    }
    let mut data = Vec::new();
    let mut limited = reader.take(max as u64 + 1);
    limited.read_to_end(&mut data).ok()?;
    if data.len() as i64 <= max {
        return Some((data, false));
    }
    data.truncate(max as usize);
    Some((data, true))
}

/// Whether a Content-Type names a payload we expect to render as text.
pub fn is_probably_text(content_type: &str) -> bool {
    if content_type.is_empty() {
        return false;
    }
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    media_type.starts_with("text/")
        || media_type == "application/json"
        || media_type == "application/xml"
        || media_type == "application/x-www-form-urlencoded"
        || media_type.ends_with("+json")
        || media_type.ends_with("+xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_first_header_value_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());

        assert_eq!(
            first_header_value(&headers, "content-type"),
            Some("text/plain")
        );
        assert_eq!(first_header_value(&headers, "Content-Type"), Some("text/plain"));
        assert_eq!(first_header_value(&headers, "accept"), None);
    }

    #[test]
    fn test_preview_plain_text() {
        let (body, truncated) = body_preview(Some("text/plain"), None, b"hello", 1024);
        assert_eq!(body, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_preview_empty_capture() {
        let (body, truncated) = body_preview(Some("text/plain"), None, b"", 1024);
        assert_eq!(body, "");
        assert!(!truncated);
    }

    #[test]
    fn test_preview_decompresses_gzip() {
        let compressed = gzip(b"{\"answer\": 42}");
        let (body, truncated) = body_preview(
            Some("application/json"),
            Some("gzip"),
            &compressed,
            1024,
        );
        assert_eq!(body, "{\"answer\": 42}");
        assert!(!truncated);
    }

    #[test]
    fn test_preview_gzip_output_limited() {
        let payload = "x".repeat(100);
        let compressed = gzip(payload.as_bytes());
        let (body, truncated) = body_preview(Some("text/plain"), Some("gzip"), &compressed, 10);
        assert_eq!(body, "xxxxxxxxxx");
        assert!(truncated);
    }

    #[test]
    fn test_preview_corrupt_gzip_falls_back_to_raw() {
        // Not a gzip stream; the raw bytes happen to be valid UTF-8.
        let (body, truncated) = body_preview(Some("text/plain"), Some("gzip"), b"plain", 1024);
        assert_eq!(body, "plain");
        assert!(!truncated);
    }

    #[test]
    fn test_preview_binary_placeholder() {
        let data = [0xff, 0xfe, 0x00, 0x01];
        let (body, _) = body_preview(Some("application/octet-stream"), None, &data, 1024);
        assert_eq!(body, "[binary content omitted; 4 bytes captured]");
    }

    #[test]
    fn test_preview_binary_after_decompression() {
        let compressed = gzip(&[0xff, 0xfe, 0x00]);
        let (body, _) = body_preview(None, Some("gzip"), &compressed, 1024);
        assert_eq!(body, "[binary content omitted; 3 bytes after decompression]");
    }

    #[test]
    fn test_is_probably_text() {
        assert!(is_probably_text("text/plain"));
        assert!(is_probably_text("text/html; charset=utf-8"));
        assert!(is_probably_text("application/json"));
        assert!(is_probably_text("application/xml"));
        assert!(is_probably_text("application/x-www-form-urlencoded"));
        assert!(is_probably_text("application/problem+json"));
        assert!(is_probably_text("image/svg+xml"));
        assert!(!is_probably_text("application/octet-stream"));
        assert!(!is_probably_text(""));
    }

    #[test]
    fn test_finalize_record_sets_sizes_and_truncation() {
        let mut record = RequestRecord::default();
        record
            .request_headers
            .insert("content-type".to_string(), "text/plain".to_string());

        let req_capture = BoundedCapture::new(4);
        req_capture.write(b"0123456789");
        let resp_capture = BoundedCapture::new(1024);
        resp_capture.write(b"abcd");

        let logging = LoggingConfig::default();
        finalize_record(
            &mut record,
            &req_capture,
            Some(&resp_capture),
            &logging,
            Instant::now(),
        );

        assert_eq!(record.request_body_size, 10);
        assert_eq!(record.request_body, "0123");
        assert_eq!(record.response_body_size, 4);
        assert_eq!(record.response_body, "abcd");
        assert!(record.truncated);
        assert!(record.latency_ms >= 0);
    }
}
