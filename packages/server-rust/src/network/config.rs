//! Settings of the HTTP surface.

use std::time::Duration;

/// Bind address, CORS policy and per-request limits of the HTTP server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// 0 lets the OS pick a port.
    pub port: u16,
    /// `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    pub request_timeout: Duration,
    /// Largest accepted request body in bytes.
    pub body_limit: usize,
    /// How long shutdown waits for in-flight calls.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            body_limit: 1024 * 1024,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl NetworkConfig {
    /// `host:port` for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
