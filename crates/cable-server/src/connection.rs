//! One WebSocket's lifecycle: open, messages, close.
//!
//! The reactor (see [`websocket`](crate::websocket)) only forwards socket
//! events here. Each event becomes a job on the connection's [`Lane`], so
//! `connect`, every command and `disconnect` run one at a time in arrival
//! order and never on the reactor itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cable_core::identity::internal_topic;
use cable_core::protocol::{Command, InternalMessage};
use cable_core::{CableError, Identifiers, Result, Signal};
use cable_pubsub::{MessageCallback, StreamHandle};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::heartbeat::run_heartbeat;
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use crate::request::HandshakeRequest;
use crate::server::CableServer;
use crate::socket::ClientSocket;
use crate::subscriptions::Subscriptions;
use crate::worker::{JobHandle, Lane, catch_panic};

/// Snapshot of one open connection.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatistics {
    /// Identity string (empty for anonymous connections).
    pub identifier: String,
    /// When the socket was accepted.
    pub started_at: DateTime<Utc>,
    /// Identifiers of live subscriptions.
    pub subscriptions: Vec<String>,
    /// Request id of the opening request.
    pub request_id: String,
}

/// A stateful wrapper around one client WebSocket.
pub struct Connection {
    id: Uuid,
    this: Weak<Connection>,
    server: Arc<CableServer>,
    socket: Arc<ClientSocket>,
    request: HandshakeRequest,
    identifiers: RwLock<Identifiers>,
    subscriptions: Subscriptions,
    lane: Lane,
    beating: Arc<AtomicBool>,
    heartbeat_cancel: CancellationToken,
    internal_stream: Mutex<Option<StreamHandle>>,
    opened: Signal,
    closed: Signal,
    open_called: AtomicBool,
    close_called: AtomicBool,
    connected: AtomicBool,
    started_at: DateTime<Utc>,
    span: Span,
}

impl Connection {
    /// Bind a new connection to `socket`. Must be called inside a Tokio runtime.
    pub fn new(
        server: Arc<CableServer>,
        socket: Arc<ClientSocket>,
        request: HandshakeRequest,
    ) -> Arc<Self> {
        let id = Uuid::now_v7();
        let lane = server.worker_pool().lane(id.to_string());
        let span = info_span!(
            "connection",
            connection_id = %id,
            identity = tracing::field::Empty
        );
        Arc::new_cyclic(|this| Self {
            id,
            this: this.clone(),
            server,
            socket,
            request,
            identifiers: RwLock::new(Identifiers::new()),
            subscriptions: Subscriptions::new(),
            lane,
            beating: Arc::new(AtomicBool::new(false)),
            heartbeat_cancel: CancellationToken::new(),
            internal_stream: Mutex::new(None),
            opened: Signal::new(),
            closed: Signal::new(),
            open_called: AtomicBool::new(false),
            close_called: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            started_at: Utc::now(),
            span,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Process-local id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The server this connection belongs to.
    pub fn server(&self) -> &Arc<CableServer> {
        &self.server
    }

    /// Outbound socket handle.
    pub fn socket(&self) -> &Arc<ClientSocket> {
        &self.socket
    }

    /// The request that opened this connection.
    pub fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    /// Worker lane all of this connection's jobs run on.
    pub fn lane(&self) -> &Lane {
        &self.lane
    }

    /// Live channel instances.
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Identifiers set by `connect`.
    pub fn identifiers(&self) -> Identifiers {
        self.identifiers.read().clone()
    }

    /// Identity string derived from the identifiers.
    pub fn identity(&self) -> String {
        self.identifiers.read().identity()
    }

    /// Whether `connect` succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Completes once `connect` has succeeded.
    pub fn opened(&self) -> &Signal {
        &self.opened
    }

    /// Completes once the close sequence has finished.
    pub fn closed(&self) -> &Signal {
        &self.closed
    }

    /// Send a raw JSON frame.
    pub fn transmit<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let _ = self.socket.transmit(serde_json::to_string(message)?);
        Ok(())
    }

    /// Close the socket. The close sequence follows once the reactor notices.
    pub fn close(&self) {
        self.socket.close();
    }

    /// Identity, start time, subscriptions and request id.
    pub fn statistics(&self) -> ConnectionStatistics {
        ConnectionStatistics {
            identifier: self.identity(),
            started_at: self.started_at,
            subscriptions: self.subscriptions.identifiers(),
            request_id: self.request.request_id.clone(),
        }
    }

    // ── Socket events ───────────────────────────────────────────────

    /// Socket opened: authorize, identify, start heartbeat.
    pub fn on_open(self: &Arc<Self>) -> JobHandle {
        let this = self.clone();
        self.submit(async move { this.handle_open().await })
    }

    /// Text frame received. Runs once the connection is opened or refused.
    pub fn on_message(self: &Arc<Self>, text: String) -> JobHandle {
        let this = self.clone();
        self.submit_when_opened(async move {
            if let Err(e) = this.handle_message(&text).await {
                error!(error = %e, category = %e.category(), "Error handling {text:?}: {e}");
            }
            Ok(())
        })
    }

    /// Socket closed: tear everything down.
    pub fn on_close(self: &Arc<Self>) -> JobHandle {
        let this = self.clone();
        self.submit_when_opened(async move { this.handle_close().await })
    }

    fn submit<F>(&self, job: F) -> JobHandle
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.lane.submit(
            self.server.handler().exception_handler(),
            job.instrument(self.span.clone()),
        )
    }

    fn submit_when_opened<F>(self: &Arc<Self>, job: F) -> JobHandle
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let this = self.clone();
        self.lane.submit_when(
            async move { this.wait_until_opened().await },
            self.server.handler().exception_handler(),
            job.instrument(self.span.clone()),
        )
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    async fn handle_open(self: Arc<Self>) -> Result<()> {
        if self.open_called.swap(true, Ordering::AcqRel) {
            return Err(CableError::AlreadyOpened);
        }
        info!("{}", self.request.started_message());
        counter!(CONNECTIONS_TOTAL).increment(1);

        let handler = self.server.handler().clone();
        let identifiers = match catch_panic(handler.connect(&self)).await {
            Ok(identifiers) => identifiers,
            Err(CableError::Unauthorized) => {
                error!("An unauthorized connection attempt was rejected");
                counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                self.socket.close();
                return Ok(());
            }
            Err(e) => {
                self.socket.close();
                return Err(e);
            }
        };

        let declared = handler.identified_by();
        let undeclared: Vec<String> = identifiers
            .names()
            .filter(|name| !declared.contains(name))
            .map(ToOwned::to_owned)
            .collect();
        if !undeclared.is_empty() {
            self.socket.close();
            return Err(CableError::InvalidIdentifiers(undeclared));
        }

        let identity = identifiers.identity();
        let _ = self.span.record("identity", identity.as_str());
        *self.identifiers.write() = identifiers;

        if !identity.is_empty() {
            if let Err(e) = self.subscribe_to_internal_channel(&identity).await {
                warn!(error = %e, "failed to subscribe to internal channel");
            }
        }

        self.connected.store(true, Ordering::Release);
        self.start_heartbeat(self.server.config().heartbeat_interval);
        self.server.open_connections().add(self.clone()).await;
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        let _ = self.opened.complete();
        Ok(())
    }

    async fn handle_message(self: &Arc<Self>, text: &str) -> Result<()> {
        if !self.socket.is_alive() || !self.is_connected() {
            error!("Received data without a live WebSocket ({text:?})");
            return Ok(());
        }
        let command = Command::decode(text)?;
        debug!(command = command.name(), identifier = command.identifier(), "received command");
        self.subscriptions.execute(self, command).await
    }

    async fn handle_close(self: Arc<Self>) -> Result<()> {
        if self.close_called.swap(true, Ordering::AcqRel) {
            return Err(CableError::AlreadyClosed);
        }

        if !self.is_connected() {
            info!("{}", self.request.finished_message());
            let _ = self.closed.complete();
            return Ok(());
        }

        self.stop_heartbeat();
        self.subscriptions.unsubscribe_all().await;
        self.unsubscribe_from_internal_channel().await;
        self.server.open_connections().remove(self.id).await;
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);

        let handler = self.server.handler().clone();
        let result = catch_panic(handler.disconnect(&self)).await;

        info!("{}", self.request.finished_message());
        let _ = self.closed.complete();
        result
    }

    // Rejected connections never complete `opened`; their socket is closed instead.
    async fn wait_until_opened(&self) {
        tokio::select! {
            () = self.opened.wait() => {}
            () = self.socket.closed().wait() => {}
        }
    }

    // ── Heartbeat ───────────────────────────────────────────────────

    fn start_heartbeat(&self, interval: Duration) {
        if self.beating.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = tokio::spawn(
            run_heartbeat(
                self.socket.clone(),
                interval,
                self.beating.clone(),
                self.heartbeat_cancel.clone(),
            )
            .instrument(self.span.clone()),
        );
    }

    fn stop_heartbeat(&self) {
        self.beating.store(false, Ordering::Release);
        self.heartbeat_cancel.cancel();
    }

    // ── Internal channel ────────────────────────────────────────────

    async fn subscribe_to_internal_channel(&self, identity: &str) -> Result<()> {
        let topic = internal_topic(identity);
        let this = self.this.clone();
        let callback: MessageCallback = Arc::new(move |payload| {
            let Some(connection) = this.upgrade() else {
                return;
            };
            match InternalMessage::decode(&payload) {
                Ok(InternalMessage::Disconnect) => {
                    info!(parent: &connection.span, "Removing connection ({})", connection.identity());
                    connection.close();
                }
                Ok(InternalMessage::Unknown) => {
                    debug!(parent: &connection.span, "ignoring unknown internal message");
                }
                Err(e) => {
                    error!(parent: &connection.span, error = %e, "There was an exception - {e}");
                }
            }
        });
        let handle = self.server.multiplexer().subscribe(&topic, callback).await?;
        *self.internal_stream.lock().await = Some(handle);
        debug!(topic, "subscribed to internal channel");
        Ok(())
    }

    async fn unsubscribe_from_internal_channel(&self) {
        let Some(handle) = self.internal_stream.lock().await.take() else {
            return;
        };
        if let Err(e) = self.server.multiplexer().unsubscribe(&handle).await {
            warn!(topic = handle.topic(), error = %e, "failed to leave internal channel");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
