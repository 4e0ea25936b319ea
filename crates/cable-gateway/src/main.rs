//! # cable-gateway
//!
//! Cable gateway binary. Loads settings, wires the demo channels to an
//! in-process bus and serves the cable endpoint until Ctrl-C.

#![deny(unsafe_code)]

mod channels;
mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cable_pubsub::MemoryBus;
use cable_server::{CableServer, ServerConfig};
use cable_settings::CableSettings;
use clap::Parser;

use crate::handler::QueryUserHandler;

/// Cable gateway server.
#[derive(Parser, Debug)]
#[command(name = "cable-gateway", about = "WebSocket pub/sub gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.cable/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,

    /// Accept connections without a `?user=` parameter.
    #[arg(long)]
    allow_anonymous: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<CableSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(cable_settings::settings_path);
        cable_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }

    fn server_config(&self, settings: &CableSettings) -> ServerConfig {
        let mut config = ServerConfig::from(&settings.server);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }

    fn log_level(&self, settings: &CableSettings) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| settings.logging.level.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    let level = args.log_level(&settings);
    if settings.logging.json {
        cable_core::logging::init_json_subscriber(&level);
    } else {
        cable_core::logging::init_subscriber(&level);
    }

    let config = args.server_config(&settings);
    let mut server = CableServer::new(
        config,
        Arc::new(MemoryBus::new()),
        QueryUserHandler::new(args.allow_anonymous),
        channels::registry(),
    );
    match cable_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed"),
    }
    let server = Arc::new(server);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!(
        "Cable gateway listening on ws://{addr}{} (channels: {})",
        server.config().mount_path,
        server.channels().names().join(", ")
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown_gracefully().await;
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_defer_to_settings() {
        let cli = Cli::try_parse_from(["cable-gateway"]).unwrap();
        let settings = CableSettings::default();
        let config = cli.server_config(&settings);
        assert_eq!(config.host, settings.server.host);
        assert_eq!(config.port, settings.server.port);
        assert_eq!(cli.log_level(&settings), settings.logging.level);
        assert!(!cli.allow_anonymous);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::try_parse_from([
            "cable-gateway",
            "--host",
            "0.0.0.0",
            "--port",
            "28080",
            "--log-level",
            "debug",
            "--allow-anonymous",
        ])
        .unwrap();
        let settings = CableSettings::default();
        let config = cli.server_config(&settings);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 28080);
        assert_eq!(cli.log_level(&settings), "debug");
        assert!(cli.allow_anonymous);
    }

    #[test]
    fn settings_file_feeds_server_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"mountPath": "/ws", "heartbeatIntervalMs": 1500}}"#)
            .unwrap();
        let cli = Cli::try_parse_from(["cable-gateway", "--settings", path.to_str().unwrap()])
            .unwrap();

        let settings = cli.load_settings().unwrap();
        let config = cli.server_config(&settings);
        assert_eq!(config.mount_path, "/ws");
        assert_eq!(config.heartbeat_interval.as_millis(), 1500);
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        let cli = Cli::try_parse_from(["cable-gateway", "--settings", path.to_str().unwrap()])
            .unwrap();
        let err = cli.load_settings().unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
