//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every struct is `#[serde(default)]`
//! so a partial JSON file only overrides what it names.

use serde::{Deserialize, Serialize};

/// Root settings document.
///
/// ```json
/// {
///   "server": { "port": 28080, "allowedRequestOrigins": ["https://example.com"] },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CableSettings {
    /// HTTP/WebSocket server settings.
    pub server: ServerSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// HTTP/WebSocket server settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Path the WebSocket endpoint is mounted at.
    pub mount_path: String,
    /// Milliseconds between heartbeat pings.
    pub heartbeat_interval_ms: u64,
    /// Number of user callbacks that may run at once across all connections.
    pub worker_pool_size: usize,
    /// Origins allowed to open a socket.
    pub allowed_request_origins: Vec<String>,
    /// Skip the origin check entirely.
    pub disable_request_forgery_protection: bool,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before frames are dropped.
    pub outbound_buffer_size: usize,
    /// How long shutdown waits for open connections to drain.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            mount_path: "/cable".into(),
            heartbeat_interval_ms: 3_000,
            worker_pool_size: 4,
            allowed_request_origins: Vec::new(),
            disable_request_forgery_protection: false,
            max_message_size: 1024 * 1024,
            outbound_buffer_size: 1024,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.port, 0);
        assert_eq!(s.mount_path, "/cable");
        assert_eq!(s.heartbeat_interval_ms, 3_000);
        assert_eq!(s.worker_pool_size, 4);
        assert!(s.allowed_request_origins.is_empty());
        assert!(!s.disable_request_forgery_protection);
    }

    #[test]
    fn logging_defaults() {
        let l = LoggingSettings::default();
        assert_eq!(l.level, "info");
        assert!(!l.json);
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(CableSettings::default()).unwrap();
        assert!(json["server"].get("heartbeatIntervalMs").is_some());
        assert!(json["server"].get("allowedRequestOrigins").is_some());
        assert!(json["server"].get("disableRequestForgeryProtection").is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: CableSettings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.heartbeat_interval_ms, 3_000);
        assert_eq!(s.logging.level, "info");
    }
}
