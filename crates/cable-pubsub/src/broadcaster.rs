//! Encoding and publishing application messages.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use cable_core::Result;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::BROADCASTS_TOTAL;
use crate::bus::PubSubBus;

/// Default bound on [`Broadcasting`]'s cache.
pub const MAX_CACHED_BROADCASTERS: usize = 1024;

/// Publishes JSON-encoded messages to one topic.
pub struct Broadcaster {
    topic: String,
    bus: Arc<dyn PubSubBus>,
}

impl Broadcaster {
    /// Broadcaster for `topic` on `bus`.
    pub fn new(topic: impl Into<String>, bus: Arc<dyn PubSubBus>) -> Self {
        Self {
            topic: topic.into(),
            bus,
        }
    }

    /// Target topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode and publish `message`. Best effort: nobody acknowledges it.
    pub async fn broadcast<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        info!("Broadcasting to {}: {}", self.topic, payload);
        counter!(BROADCASTS_TOTAL).increment(1);
        self.bus
            .publish(&self.topic, Bytes::from(payload))
            .await
            .inspect_err(|e| error!(topic = %self.topic, error = %e, "broadcast failed"))?;
        Ok(())
    }
}

/// Per-topic [`Broadcaster`] cache.
///
/// Holds at most `capacity` broadcasters; the cache is emptied when a new
/// topic would exceed it.
pub struct Broadcasting {
    bus: Arc<dyn PubSubBus>,
    broadcasters: Mutex<HashMap<String, Arc<Broadcaster>>>,
    capacity: usize,
}

impl Broadcasting {
    /// Cache over `bus`, bounded by [`MAX_CACHED_BROADCASTERS`].
    pub fn new(bus: Arc<dyn PubSubBus>) -> Self {
        Self::with_capacity(bus, MAX_CACHED_BROADCASTERS)
    }

    /// Cache over `bus` holding at most `capacity` broadcasters.
    pub fn with_capacity(bus: Arc<dyn PubSubBus>, capacity: usize) -> Self {
        Self {
            bus,
            broadcasters: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// The cached broadcaster for `topic`, created on first use.
    pub fn broadcaster_for(&self, topic: &str) -> Arc<Broadcaster> {
        let mut broadcasters = self.broadcasters.lock();
        if let Some(broadcaster) = broadcasters.get(topic) {
            return broadcaster.clone();
        }
        if broadcasters.len() >= self.capacity {
            debug!(evicted = broadcasters.len(), "broadcaster cache full, clearing");
            broadcasters.clear();
        }
        let broadcaster = Arc::new(Broadcaster::new(topic, self.bus.clone()));
        let _ = broadcasters.insert(topic.to_owned(), broadcaster.clone());
        broadcaster
    }

    /// Number of cached broadcasters.
    pub fn cached(&self) -> usize {
        self.broadcasters.lock().len()
    }

    /// Publish `message` to `topic`.
    pub async fn broadcast<T: Serialize + ?Sized>(&self, topic: &str, message: &T) -> Result<()> {
        self.broadcaster_for(topic).broadcast(message).await
    }
}
