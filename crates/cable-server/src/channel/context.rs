//! The runtime side of a channel instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use cable_core::identity::channel_broadcasting;
use cable_core::protocol::message_frame;
use cable_core::{IdentifierValue, Result, ToBroadcasting};
use cable_pubsub::{MessageCallback, StreamHandle};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Params;
use crate::connection::Connection;
use crate::server::CableServer;
use crate::socket::ClientSocket;
use crate::worker::Lane;

type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Everything a channel instance can do to its connection and the server.
///
/// Cheap to clone; clones share stream registrations and rejection state.
#[derive(Clone)]
pub struct ChannelContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    channel: &'static str,
    identifier: String,
    params: Params,
    connection: Weak<Connection>,
    socket: Arc<ClientSocket>,
    server: Arc<CableServer>,
    lane: Lane,
    streams: Mutex<Vec<(StreamHandle, Arc<AtomicBool>)>>,
    rejected: AtomicBool,
}

impl ChannelContext {
    pub(crate) fn new(
        channel: &'static str,
        identifier: String,
        params: Params,
        connection: &Arc<Connection>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                channel,
                identifier,
                params,
                connection: Arc::downgrade(connection),
                socket: connection.socket().clone(),
                server: connection.server().clone(),
                lane: connection.lane().clone(),
                streams: Mutex::new(Vec::new()),
                rejected: AtomicBool::new(false),
            }),
        }
    }

    /// Client-chosen key of this subscription.
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Registered channel type name.
    pub fn channel_name(&self) -> &'static str {
        self.inner.channel
    }

    /// Decoded identifier object.
    pub fn params(&self) -> &Params {
        &self.inner.params
    }

    /// One identifier param.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.inner.params.get(name)
    }

    /// Owning connection, while it is alive.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner.connection.upgrade()
    }

    /// One of the owning connection's identifiers.
    pub fn connection_identifier(&self, name: &str) -> Option<IdentifierValue> {
        self.connection()
            .and_then(|c| c.identifiers().get(name).cloned())
    }

    pub(crate) fn lane(&self) -> &Lane {
        &self.inner.lane
    }

    /// The server this channel runs in.
    pub fn server(&self) -> &Arc<CableServer> {
        &self.inner.server
    }

    /// Send `{"identifier", "message"}` to this subscriber.
    pub fn transmit<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let frame = message_frame(&self.inner.identifier, message)?;
        debug!(channel = self.inner.channel, "transmitting {frame}");
        if !self.inner.socket.transmit(frame) {
            debug!(
                channel = self.inner.channel,
                identifier = %self.inner.identifier,
                "frame not delivered"
            );
        }
        Ok(())
    }

    /// Forward every message published on `topic` to this subscriber.
    pub async fn stream_from(&self, topic: &str) -> Result<()> {
        self.stream(topic, None).await
    }

    /// Like [`stream_from`](Self::stream_from), passing each message through `transform` first.
    pub async fn stream_from_with<F>(&self, topic: &str, transform: F) -> Result<()>
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.stream(topic, Some(Arc::new(transform))).await
    }

    /// Stream the topic this channel type uses for `model`.
    pub async fn stream_for<M: ToBroadcasting + ?Sized>(&self, model: &M) -> Result<()> {
        self.stream_from(&channel_broadcasting(self.inner.channel, model))
            .await
    }

    async fn stream(&self, topic: &str, transform: Option<Transform>) -> Result<()> {
        let live = Arc::new(AtomicBool::new(true));
        let callback = self.stream_callback(live.clone(), transform);
        let handle = self
            .inner
            .server
            .multiplexer()
            .subscribe(topic, callback)
            .await?;
        self.inner.streams.lock().await.push((handle, live));
        info!("{} is streaming from {topic}", self.inner.channel);
        Ok(())
    }

    // Deliveries run on the connection's lane so they queue behind the
    // subscribe sequence and any in-flight action. `live` is cleared when the
    // stream stops, so deliveries already queued are dropped.
    fn stream_callback(&self, live: Arc<AtomicBool>, transform: Option<Transform>) -> MessageCallback {
        let identifier = self.inner.identifier.clone();
        let socket = self.inner.socket.clone();
        let lane = self.inner.lane.clone();
        Arc::new(move |payload: Bytes| {
            let identifier = identifier.clone();
            let socket = socket.clone();
            let transform = transform.clone();
            let live = live.clone();
            let _ = lane.submit(None, async move {
                deliver(&live, &socket, &identifier, transform.as_ref(), &payload)
            });
        })
    }

    /// Drop every stream registration made so far.
    pub async fn stop_all_streams(&self) {
        let streams = std::mem::take(&mut *self.inner.streams.lock().await);
        for (handle, live) in streams {
            live.store(false, Ordering::Release);
            if let Err(e) = self.inner.server.multiplexer().unsubscribe(&handle).await {
                warn!(topic = handle.topic(), error = %e, "failed to stop stream");
            } else {
                info!("{} stopped streaming from {}", self.inner.channel, handle.topic());
            }
        }
    }

    /// Refuse this subscription. Takes effect when the subscribe sequence
    /// reaches its next step.
    pub fn reject(&self) {
        self.inner.rejected.store(true, Ordering::Release);
    }

    /// Whether [`reject`](Self::reject) was called.
    pub fn is_rejected(&self) -> bool {
        self.inner.rejected.load(Ordering::Acquire)
    }

    /// Broadcast `message` on the topic this channel type uses for `model`.
    pub async fn broadcast_to<M, T>(&self, model: &M, message: &T) -> Result<()>
    where
        M: ToBroadcasting + ?Sized,
        T: Serialize + ?Sized,
    {
        self.inner
            .server
            .broadcast(&channel_broadcasting(self.inner.channel, model), message)
            .await
    }
}

fn deliver(
    live: &AtomicBool,
    socket: &ClientSocket,
    identifier: &str,
    transform: Option<&Transform>,
    payload: &[u8],
) -> Result<()> {
    if !live.load(Ordering::Acquire) {
        return Ok(());
    }
    let mut message = decode_payload(payload);
    if let Some(transform) = transform {
        message = transform(message);
    }
    let _ = socket.transmit(message_frame(identifier, &message)?);
    Ok(())
}

fn decode_payload(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_payload_is_decoded() {
        assert_eq!(decode_payload(br#"{"text":"hi"}"#), json!({"text": "hi"}));
    }

    #[test]
    fn non_json_payload_becomes_string() {
        assert_eq!(decode_payload(b"plain words"), json!("plain words"));
    }

    #[test]
    fn delivery_is_transformed_and_framed() {
        let (socket, mut rx) = ClientSocket::pair(4);
        let live = AtomicBool::new(true);
        let wrap: Transform = Arc::new(|v| json!({ "wrapped": v }));

        deliver(&live, &socket, "room-1", Some(&wrap), br#"{"n":1}"#).unwrap();

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["identifier"], "room-1");
        assert_eq!(frame["message"], json!({ "wrapped": { "n": 1 } }));
    }

    #[test]
    fn delivery_after_stop_is_dropped() {
        let (socket, mut rx) = ClientSocket::pair(4);
        let live = AtomicBool::new(false);

        deliver(&live, &socket, "room-1", None, br#"{"n":1}"#).unwrap();

        assert!(rx.try_recv().is_err());
    }
}
