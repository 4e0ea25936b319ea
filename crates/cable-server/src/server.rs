//! `CableServer`: composition root and Axum router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use cable_core::identity::channel_broadcasting;
use cable_core::{Identifiers, Result, ToBroadcasting};
use cable_pubsub::{Broadcasting, PubSubBus, TopicMultiplexer};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::channel::{Channel, ChannelRegistry};
use crate::config::ServerConfig;
use crate::connection::ConnectionStatistics;
use crate::connections::OpenConnections;
use crate::handler::ConnectionHandler;
use crate::health::{self, HealthResponse};
use crate::metrics::{CONNECTIONS_REJECTED_TOTAL, render};
use crate::remote_connections::RemoteConnections;
use crate::request::{HandshakeRequest, HandshakeResponse, process};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::run_session;
use crate::worker::WorkerPool;

/// The cable server.
///
/// Everything a connection or channel needs is reached through this value;
/// wrap it in an `Arc` before building the router.
pub struct CableServer {
    config: ServerConfig,
    handler: Arc<dyn ConnectionHandler>,
    channels: ChannelRegistry,
    multiplexer: TopicMultiplexer,
    broadcasting: Broadcasting,
    worker_pool: WorkerPool,
    open_connections: OpenConnections,
    shutdown: ShutdownCoordinator,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl CableServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        bus: Arc<dyn PubSubBus>,
        handler: impl ConnectionHandler,
        channels: ChannelRegistry,
    ) -> Self {
        let worker_pool = WorkerPool::new(config.worker_pool_size);
        Self {
            config,
            handler: Arc::new(handler),
            channels,
            multiplexer: TopicMultiplexer::new(bus.clone()),
            broadcasting: Broadcasting::new(bus),
            worker_pool,
            open_connections: OpenConnections::new(),
            shutdown: ShutdownCoordinator::new(),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `GET /metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the connection handler.
    pub fn handler(&self) -> &Arc<dyn ConnectionHandler> {
        &self.handler
    }

    /// Get the channel registry.
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Get the topic multiplexer over the shared bus.
    pub fn multiplexer(&self) -> &TopicMultiplexer {
        &self.multiplexer
    }

    /// Get the worker pool.
    pub fn worker_pool(&self) -> &WorkerPool {
        &self.worker_pool
    }

    /// Get the open-connection registry.
    pub fn open_connections(&self) -> &OpenConnections {
        &self.open_connections
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Token cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    // ── Broadcasting ────────────────────────────────────────────────

    /// Publish `message` to every subscriber of `topic`, in any process.
    pub async fn broadcast<T: Serialize + ?Sized>(&self, topic: &str, message: &T) -> Result<()> {
        self.broadcasting.broadcast(topic, message).await
    }

    /// Publish on the topic channel type `C` streams for `model`.
    pub async fn broadcast_to<C, M, T>(&self, model: &M, message: &T) -> Result<()>
    where
        C: Channel,
        M: ToBroadcasting + ?Sized,
        T: Serialize + ?Sized,
    {
        self.broadcast(&channel_broadcasting(C::NAME, model), message)
            .await
    }

    // ── Connections ─────────────────────────────────────────────────

    /// Identity-addressed access to connections across processes.
    pub fn remote_connections(self: &Arc<Self>) -> RemoteConnections<'_> {
        RemoteConnections::new(self)
    }

    /// Disconnect whichever connection carries `identifiers`.
    pub async fn disconnect(self: &Arc<Self>, identifiers: Identifiers) -> Result<()> {
        self.remote_connections()
            .where_identified(identifiers)?
            .disconnect()
            .await
    }

    /// Statistics of every connection open in this process.
    pub async fn open_connections_statistics(&self) -> Vec<ConnectionStatistics> {
        self.open_connections.statistics().await
    }

    /// Number of connections open in this process.
    pub async fn connection_count(&self) -> usize {
        self.open_connections.connection_count().await
    }

    // ── HTTP ────────────────────────────────────────────────────────

    /// Build the Axum router with all routes.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(&self.config.mount_path, any(cable_handler))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn listen(self: &Arc<Self>) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        info!(addr = %local_addr, mount_path = %self.config.mount_path, "cable server listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Close every socket, stop the listener and wait for connections to finish closing.
    pub async fn shutdown_gracefully(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .open_connections
            .all()
            .await
            .into_iter()
            .map(|connection| {
                connection.close();
                tokio::spawn(async move { connection.closed().wait().await })
            })
            .collect();
        self.shutdown
            .graceful_shutdown(handles, Some(self.config.shutdown_timeout))
            .await;
    }
}

/// GET /health
async fn health_handler(State(server): State<Arc<CableServer>>) -> Json<HealthResponse> {
    let connections = server.connection_count().await;
    let topics = server.multiplexer.topic_count().await;
    Json(health::health_check(server.start_time, connections, topics))
}

/// GET /metrics
async fn metrics_handler(State(server): State<Arc<CableServer>>) -> Response {
    match &server.metrics {
        Some(handle) => render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// The cable endpoint: validate, then upgrade.
async fn cable_handler(State(server): State<Arc<CableServer>>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    let remote = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let handshake = HandshakeRequest::from_parts(&parts, remote);

    if process(&server.config, &handshake) == HandshakeResponse::Reject {
        counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
        return HandshakeResponse::Reject.into_response();
    }

    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade
            .max_message_size(server.config.max_message_size)
            .on_upgrade(move |ws| run_session(ws, server, handshake))
            .into_response(),
        Err(rejection) => {
            warn!(error = %rejection, "WebSocket handshake failed");
            HandshakeResponse::Reject.into_response()
        }
    }
}
