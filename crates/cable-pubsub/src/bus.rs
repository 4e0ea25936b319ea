//! The bus collaborator trait.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cable_core::BusError;

/// Callback invoked with every payload published to a subscribed topic.
///
/// Called from whatever task delivers the message, so it must not block.
pub type MessageCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Token identifying one bus-level subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BusHandle {
    /// Topic the subscription is on.
    pub topic: String,
    /// Bus-assigned id, unique per bus instance.
    pub id: u64,
}

impl fmt::Display for BusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.topic)
    }
}

/// Topic publish/subscribe primitive shared by every connection in a process.
///
/// Delivery is at-most-once: a payload published while nobody is subscribed
/// is lost.
#[async_trait]
pub trait PubSubBus: Send + Sync {
    /// Publish `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    /// Start delivering `topic` payloads to `on_message`.
    async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<BusHandle, BusError>;

    /// Stop the subscription identified by `handle`.
    async fn unsubscribe(&self, handle: &BusHandle) -> Result<(), BusError>;
}
