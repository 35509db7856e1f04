use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Listen port
    pub port: u16,
    /// Hostnames (exact match, port ignored) served by the admin console
    /// instead of the forwarder.
    pub ui_hosts: Vec<String>,
    /// Base domains used for host-based upstream routing. With "localhost"
    /// configured, requests to "openai.localhost" route to upstream "openai".
    pub proxy_domains: Vec<String>,
    /// Graceful shutdown time budget
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            ui_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            proxy_domains: vec!["localhost".to_string()],
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind.is_empty() {
            return Err(anyhow::anyhow!("Server bind address cannot be empty"));
        }
        if self.proxy_domains.iter().all(|d| d.trim().is_empty()) {
            return Err(anyhow::anyhow!(
                "At least one proxy base domain is required"
            ));
        }
        Ok(())
    }
}
