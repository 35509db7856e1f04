use serde::{Deserialize, Serialize};

/// Default detach threshold: bodies over 256KB move into the blob store.
const DEFAULT_DETACH_OVER_BYTES: i64 = 256 * 1024;
/// Default inline preview kept for detached bodies.
const DEFAULT_PREVIEW_BYTES: i64 = 4 * 1024;

/// Traffic capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Request-side capture cap in bytes. <= 0 disables accumulation (bytes
    /// are still counted).
    pub max_request_body: i64,
    /// Response-side capture cap in bytes.
    pub max_response_body: i64,
    /// Header names (case-insensitive) whose captured values are masked.
    pub sensitive_headers: Vec<String>,
    /// Detach captured bodies larger than this into the blob store.
    /// 0 uses the 256KB default; negative disables detaching.
    pub detach_body_over_bytes: i64,
    /// Bytes of a detached body kept inline for quick viewing. 0 disables
    /// the preview.
    pub body_preview_bytes: Option<i64>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_request_body: 1 << 20,       // 1MB
            max_response_body: 10 << 20,     // 10MB
            sensitive_headers: default_sensitive_headers(),
            detach_body_over_bytes: 0,
            body_preview_bytes: None,
        }
    }
}

fn default_sensitive_headers() -> Vec<String> {
    vec![
        "authorization".to_string(),
        "x-api-key".to_string(),
        "api-key".to_string(),
    ]
}

impl LoggingConfig {
    /// Resolved detach threshold: 0 means use the default, negative disables.
    pub fn detach_threshold(&self) -> i64 {
        if self.detach_body_over_bytes < 0 {
            0
        } else if self.detach_body_over_bytes == 0 {
            DEFAULT_DETACH_OVER_BYTES
        } else {
            self.detach_body_over_bytes
        }
    }

    /// Resolved preview budget for detached bodies.
    pub fn preview_bytes(&self) -> i64 {
        match self.body_preview_bytes {
            Some(v) if v <= 0 => 0,
            Some(v) => v,
            None => DEFAULT_PREVIEW_BYTES,
        }
    }

    /// Validate capture configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_threshold_resolution() {
        let mut cfg = LoggingConfig::default();
        assert_eq!(cfg.detach_threshold(), DEFAULT_DETACH_OVER_BYTES);

        cfg.detach_body_over_bytes = 8;
        assert_eq!(cfg.detach_threshold(), 8);

        cfg.detach_body_over_bytes = -1;
        assert_eq!(cfg.detach_threshold(), 0);
    }

    #[test]
    fn test_preview_bytes_resolution() {
        let mut cfg = LoggingConfig::default();
        assert_eq!(cfg.preview_bytes(), DEFAULT_PREVIEW_BYTES);

        cfg.body_preview_bytes = Some(0);
        assert_eq!(cfg.preview_bytes(), 0);

        cfg.body_preview_bytes = Some(4);
        assert_eq!(cfg.preview_bytes(), 4);
    }
}
