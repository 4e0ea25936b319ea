//! Runtime server configuration.

use std::time::Duration;

use cable_settings::ServerSettings;

/// Configuration for a [`CableServer`](crate::CableServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path the WebSocket endpoint is mounted at.
    pub mount_path: String,
    /// Time between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// User callbacks that may run at once across all connections.
    pub worker_pool_size: usize,
    /// Origins allowed to open a socket when forgery protection is on.
    pub allowed_request_origins: Vec<String>,
    /// Accept any origin.
    pub disable_request_forgery_protection: bool,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection.
    pub outbound_buffer_size: usize,
    /// How long graceful shutdown waits for connections to close.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            mount_path: s.mount_path.clone(),
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            worker_pool_size: s.worker_pool_size.max(1),
            allowed_request_origins: s.allowed_request_origins.clone(),
            disable_request_forgery_protection: s.disable_request_forgery_protection,
            max_message_size: s.max_message_size,
            outbound_buffer_size: s.outbound_buffer_size.max(1),
            shutdown_timeout: Duration::from_millis(s.shutdown_timeout_ms),
        }
    }
}
