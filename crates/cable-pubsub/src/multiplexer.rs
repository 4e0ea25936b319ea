//! Ref-counted topic subscriptions over one bus.
//!
//! Every local listener gets its own [`StreamHandle`]. The first listener on
//! a topic triggers the bus-level subscribe; the last one leaving triggers
//! the bus-level unsubscribe. Bus payloads fan out to every local listener.
//!
//! Operations are serialized by one async mutex, so a subscribe racing an
//! unsubscribe on the same topic never produces two bus subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use cable_core::BusError;
use metrics::gauge;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::BUS_SUBSCRIPTIONS_ACTIVE;
use crate::bus::{BusHandle, MessageCallback, PubSubBus};

type Listeners = Arc<RwLock<HashMap<u64, MessageCallback>>>;

struct TopicEntry {
    bus_handle: BusHandle,
    listeners: Listeners,
}

/// One local listener's registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    topic: String,
    id: u64,
}

impl StreamHandle {
    /// Topic this handle listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Shares bus subscriptions between local listeners.
pub struct TopicMultiplexer {
    bus: Arc<dyn PubSubBus>,
    topics: Mutex<HashMap<String, TopicEntry>>,
    next_id: AtomicU64,
}

impl TopicMultiplexer {
    /// Multiplex over `bus`.
    pub fn new(bus: Arc<dyn PubSubBus>) -> Self {
        Self {
            bus,
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The underlying bus.
    pub fn bus(&self) -> &Arc<dyn PubSubBus> {
        &self.bus
    }

    /// Register `on_message` for `topic`.
    ///
    /// Fails only when this is the first listener and the bus refuses the
    /// subscription; nothing is registered in that case.
    pub async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<StreamHandle, BusError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.lock().await;

        if let Some(entry) = topics.get(topic) {
            let _ = entry.listeners.write().insert(id, on_message);
            return Ok(StreamHandle {
                topic: topic.to_owned(),
                id,
            });
        }

        let listeners: Listeners = Arc::new(RwLock::new(HashMap::new()));
        let _ = listeners.write().insert(id, on_message);
        let bus_handle = self
            .bus
            .subscribe(topic, fan_out(listeners.clone()))
            .await?;
        debug!(topic, "bus subscription opened");
        gauge!(BUS_SUBSCRIPTIONS_ACTIVE).increment(1.0);

        let _ = topics.insert(
            topic.to_owned(),
            TopicEntry {
                bus_handle,
                listeners,
            },
        );
        Ok(StreamHandle {
            topic: topic.to_owned(),
            id,
        })
    }

    /// Drop one listener. Unknown handles are ignored.
    ///
    /// The bus subscription is released with the last listener; a bus
    /// failure at that point is returned but the local entry is gone either way.
    pub async fn unsubscribe(&self, handle: &StreamHandle) -> Result<(), BusError> {
        let mut topics = self.topics.lock().await;
        let Some(entry) = topics.get(&handle.topic) else {
            return Ok(());
        };

        let remaining = {
            let mut listeners = entry.listeners.write();
            if listeners.remove(&handle.id).is_none() {
                return Ok(());
            }
            listeners.len()
        };
        if remaining > 0 {
            return Ok(());
        }

        let Some(entry) = topics.remove(&handle.topic) else {
            return Ok(());
        };
        gauge!(BUS_SUBSCRIPTIONS_ACTIVE).decrement(1.0);
        debug!(topic = %handle.topic, "bus subscription closed");
        self.bus
            .unsubscribe(&entry.bus_handle)
            .await
            .inspect_err(|e| warn!(topic = %handle.topic, error = %e, "bus unsubscribe failed"))
    }

    /// Local listeners currently registered on `topic`.
    pub async fn subscription_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .await
            .get(topic)
            .map_or(0, |entry| entry.listeners.read().len())
    }

    /// Topics with at least one local listener.
    pub async fn topic_count(&self) -> usize {
        self.topics.lock().await.len()
    }
}

fn fan_out(listeners: Listeners) -> MessageCallback {
    Arc::new(move |payload: Bytes| {
        let callbacks: Vec<MessageCallback> = listeners.read().values().cloned().collect();
        for cb in callbacks {
            cb(payload.clone());
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
