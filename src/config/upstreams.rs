use hyper::Uri;
use serde::{Deserialize, Serialize};

/// A single named upstream target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Absolute target URL; its path prefix is prepended to inbound paths.
    pub target: String,
    /// Per-request timeout in seconds. 0 falls back to the 120s default.
    #[serde(default)]
    pub timeout: u64,
}

impl UpstreamConfig {
    /// Validate a single upstream entry.
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.target.is_empty() {
            return Err(anyhow::anyhow!("Upstream {:?} has an empty target", name));
        }
        let uri: Uri = self
            .target
            .parse()
            .map_err(|e| anyhow::anyhow!("Upstream {:?} target is not a valid URL: {}", name, e))?;
        if uri.scheme_str().is_none() || uri.authority().is_none() {
            return Err(anyhow::anyhow!(
                "Upstream {:?} target must be an absolute URL: {}",
                name,
                self.target
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_absolute_urls() {
        let up = UpstreamConfig {
            target: "https://api.example.test/v1".to_string(),
            timeout: 60,
        };
        assert!(up.validate("openai").is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_targets() {
        let up = UpstreamConfig {
            target: "/v1/chat".to_string(),
            timeout: 0,
        };
        assert!(up.validate("openai").is_err());

        let empty = UpstreamConfig {
            target: String::new(),
            timeout: 0,
        };
        assert!(empty.validate("openai").is_err());
    }
}
