//! In-process bus implementations.
//!
//! [`MemoryBus`] delivers synchronously from inside `publish`. Two servers
//! sharing one `Arc<MemoryBus>` behave like two processes attached to the
//! same broker. [`RecordingBus`] wraps any bus and counts calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use cable_core::BusError;
use parking_lot::RwLock;
use tracing::trace;

use crate::bus::{BusHandle, MessageCallback, PubSubBus};

// ─────────────────────────────────────────────────────────────────────────────
// MemoryBus
// ─────────────────────────────────────────────────────────────────────────────

/// Bus that lives entirely in memory.
#[derive(Default)]
pub struct MemoryBus {
    topics: RwLock<HashMap<String, HashMap<u64, MessageCallback>>>,
    next_id: AtomicU64,
}

impl MemoryBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl PubSubBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        // Clone out so callbacks may re-enter the bus.
        let callbacks: Vec<MessageCallback> = self
            .topics
            .read()
            .get(topic)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default();
        trace!(topic, receivers = callbacks.len(), "memory bus publish");
        for cb in callbacks {
            cb(payload.clone());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<BusHandle, BusError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .topics
            .write()
            .entry(topic.to_owned())
            .or_default()
            .insert(id, on_message);
        Ok(BusHandle {
            topic: topic.to_owned(),
            id,
        })
    }

    async fn unsubscribe(&self, handle: &BusHandle) -> Result<(), BusError> {
        let mut topics = self.topics.write();
        let Some(subs) = topics.get_mut(&handle.topic) else {
            return Err(BusError::UnknownHandle(handle.id));
        };
        if subs.remove(&handle.id).is_none() {
            return Err(BusError::UnknownHandle(handle.id));
        }
        if subs.is_empty() {
            let _ = topics.remove(&handle.topic);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RecordingBus
// ─────────────────────────────────────────────────────────────────────────────

/// Wrapper that counts bus-level calls before forwarding them.
pub struct RecordingBus {
    inner: Arc<dyn PubSubBus>,
    publishes: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    fail_subscribe: AtomicBool,
}

impl RecordingBus {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn PubSubBus>) -> Self {
        Self {
            inner,
            publishes: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            fail_subscribe: AtomicBool::new(false),
        }
    }

    /// Wrap a fresh [`MemoryBus`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBus::new()))
    }

    /// Number of `publish` calls seen.
    pub fn publish_calls(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Number of `subscribe` calls seen.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Number of `unsubscribe` calls seen.
    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Make subsequent `subscribe` calls fail.
    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PubSubBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        let _ = self.publishes.fetch_add(1, Ordering::SeqCst);
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<BusHandle, BusError> {
        let _ = self.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BusError::Subscribe {
                topic: topic.to_owned(),
                message: "subscribe disabled".into(),
            });
        }
        self.inner.subscribe(topic, on_message).await
    }

    async fn unsubscribe(&self, handle: &BusHandle) -> Result<(), BusError> {
        let _ = self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    fn collector() -> (MessageCallback, Arc<Mutex<Vec<Bytes>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: MessageCallback = Arc::new(move |payload| sink.lock().push(payload));
        (cb, seen)
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = MemoryBus::new();
        let (cb, seen) = collector();
        let _ = bus.subscribe("room-1", cb).await.unwrap();

        bus.publish("room-1", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(seen.lock().as_slice(), &[Bytes::from_static(b"hi")]);
    }

    #[tokio::test]
    async fn publish_to_other_topic_is_not_delivered() {
        let bus = MemoryBus::new();
        let (cb, seen) = collector();
        let _ = bus.subscribe("room-1", cb).await.unwrap();

        bus.publish("room-2", Bytes::from_static(b"hi")).await.unwrap();
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_lost() {
        let bus = MemoryBus::new();
        bus.publish("nobody", Bytes::from_static(b"x")).await.unwrap();
        let (cb, seen) = collector();
        let _ = bus.subscribe("nobody", cb).await.unwrap();
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = MemoryBus::new();
        let (cb, seen) = collector();
        let handle = bus.subscribe("t", cb).await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 1);

        bus.unsubscribe(&handle).await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 0);
        bus.publish("t", Bytes::from_static(b"x")).await.unwrap();
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn double_unsubscribe_is_unknown_handle() {
        let bus = MemoryBus::new();
        let (cb, _seen) = collector();
        let handle = bus.subscribe("t", cb).await.unwrap();
        bus.unsubscribe(&handle).await.unwrap();
        assert_matches!(
            bus.unsubscribe(&handle).await,
            Err(BusError::UnknownHandle(_))
        );
    }

    #[tokio::test]
    async fn recording_bus_counts_calls() {
        let bus = RecordingBus::in_memory();
        let (cb, seen) = collector();
        let handle = bus.subscribe("t", cb).await.unwrap();
        bus.publish("t", Bytes::from_static(b"x")).await.unwrap();
        bus.unsubscribe(&handle).await.unwrap();

        assert_eq!(bus.subscribe_calls(), 1);
        assert_eq!(bus.publish_calls(), 1);
        assert_eq!(bus.unsubscribe_calls(), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn recording_bus_can_fail_subscribes() {
        let bus = RecordingBus::in_memory();
        bus.fail_subscribes(true);
        let (cb, _seen) = collector();
        assert_matches!(
            bus.subscribe("t", cb).await,
            Err(BusError::Subscribe { .. })
        );
    }
}
