//! HTTP server configuration.

use std::net::SocketAddr;

use serde::Deserialize;

/// Configuration for the HTTP listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server binds to. Defaults to `127.0.0.1:8000`
    /// when unset and not overridden on the command line.
    pub listen_address: Option<SocketAddr>,
    /// Path serving the health report.
    pub health_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            health_path: "/health".to_string(),
        }
    }
}

impl ServerConfig {
    /// The effective bind address.
    pub fn listen_address_or_default(&self) -> SocketAddr {
        self.listen_address
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8000)))
    }
}
