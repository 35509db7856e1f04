use std::sync::Mutex;

/// A write-only tee sink that accumulates at most `max` bytes.
///
/// Bytes past the cap are counted but discarded, and the capture is marked
/// truncated. A cap <= 0 disables accumulation while still counting totals.
/// Safe for concurrent writes and queries.
pub struct BoundedCapture {
    max: i64,
    state: Mutex<CaptureState>,
}

#[derive(Default)]
struct CaptureState {
    buf: Vec<u8>,
    total: i64,
    truncated: bool,
}

impl BoundedCapture {
    pub fn new(max: i64) -> Self {
        Self {
            max,
            state: Mutex::new(CaptureState::default()),
        }
    }

    /// Record a chunk of forwarded bytes.
    pub fn write(&self, chunk: &[u8]) {
        let mut state = self.state.lock().expect("capture lock poisoned");

        state.total += chunk.len() as i64;
        if self.max <= 0 {
            return;
        }

        let remaining = self.max - state.buf.len() as i64;
        if remaining <= 0 {
            state.truncated = true;
            return;
        }
        if (chunk.len() as i64) > remaining {
            let keep = remaining as usize;
            state.buf.extend_from_slice(&chunk[..keep]);
            state.truncated = true;
            return;
        }
        state.buf.extend_from_slice(chunk);
    }

    /// Snapshot copy of the accumulated bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.state.lock().expect("capture lock poisoned").buf.clone()
    }

    /// Total bytes observed, including discarded ones.
    pub fn total(&self) -> i64 {
        self.state.lock().expect("capture lock poisoned").total
    }

    /// Whether any byte was discarded because the cap was hit.
    pub fn truncated(&self) -> bool {
        self.state.lock().expect("capture lock poisoned").truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_under_cap() {
        let capture = BoundedCapture::new(16);
        capture.write(b"hello");
        capture.write(b" world");

        assert_eq!(capture.bytes(), b"hello world");
        assert_eq!(capture.total(), 11);
        assert!(!capture.truncated());
    }

    #[test]
    fn test_capture_hits_cap() {
        let capture = BoundedCapture::new(4);
        capture.write(b"abc");
        capture.write(b"def");
        capture.write(b"ghi");

        assert_eq!(capture.bytes(), b"abcd");
        assert_eq!(capture.total(), 9);
        assert!(capture.truncated());
    }

    #[test]
    fn test_capture_exact_cap_is_not_truncated() {
        let capture = BoundedCapture::new(6);
        capture.write(b"abc");
        capture.write(b"def");

        assert_eq!(capture.bytes(), b"abcdef");
        assert_eq!(capture.total(), 6);
        assert!(!capture.truncated());
    }

    #[test]
    fn test_zero_cap_counts_totals_only() {
        let capture = BoundedCapture::new(0);
        capture.write(b"abcdef");

        assert!(capture.bytes().is_empty());
        assert_eq!(capture.total(), 6);
        assert!(!capture.truncated());
    }

    #[test]
    fn test_bounded_invariant_for_arbitrary_writes() {
        let cap = 10;
        let capture = BoundedCapture::new(cap);
        let writes: &[&[u8]] = &[b"123", b"", b"45678", b"90abcdef", b"x"];

        let mut expected_total = 0i64;
        for w in writes {
            capture.write(w);
            expected_total += w.len() as i64;
        }

        assert!(capture.bytes().len() as i64 <= cap);
        assert_eq!(capture.total(), expected_total);
        assert_eq!(capture.truncated(), expected_total > cap);
    }
}
