//! Per-connection registry of channel instances, keyed by identifier.

use std::collections::HashMap;
use std::sync::Arc;

use cable_core::protocol::{ChannelIdentifier, Command, decode_action_data, rejection_frame};
use cable_core::Result;
use metrics::gauge;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::channel::context::ChannelContext;
use crate::channel::instance::{ChannelInstance, SubscribeOutcome};
use crate::connection::Connection;
use crate::metrics::SUBSCRIPTIONS_ACTIVE;

/// Routes client commands to channel instances.
///
/// Only the owning connection's lane touches this, so the lock is never
/// contended; entries are cloned out before any await.
#[derive(Default)]
pub struct Subscriptions {
    entries: Mutex<HashMap<String, Arc<dyn ChannelInstance>>>,
}

impl Subscriptions {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded client command.
    pub async fn execute(&self, connection: &Arc<Connection>, command: Command) -> Result<()> {
        match command {
            Command::Subscribe { identifier } => self.add(connection, identifier).await,
            Command::Unsubscribe { identifier } => self.remove(&identifier).await,
            Command::Message { identifier, data } => self.perform_action(&identifier, &data).await,
        }
    }

    async fn add(&self, connection: &Arc<Connection>, identifier: String) -> Result<()> {
        if self.find(&identifier).is_some() {
            self.remove(&identifier).await?;
        }

        let decoded = ChannelIdentifier::decode(&identifier)?;
        let Some(factory) = connection.server().channels().factory(&decoded.channel) else {
            error!(
                identifier = %identifier,
                "Subscription class not found: {}",
                decoded.channel
            );
            return Ok(());
        };
        let ctx = ChannelContext::new(
            factory.name(),
            identifier.clone(),
            decoded.params,
            connection,
        );
        let instance = factory.build(ctx);
        let _ = self
            .entries
            .lock()
            .insert(identifier.clone(), instance.clone());
        gauge!(SUBSCRIPTIONS_ACTIVE).increment(1.0);

        if instance.subscribe_to_channel().await == SubscribeOutcome::Rejected {
            let _ = self.entries.lock().remove(&identifier);
            gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
            let _ = connection.socket().transmit(rejection_frame(&identifier)?);
        }
        Ok(())
    }

    /// Tear down the instance under `identifier`. Unknown identifiers are ignored.
    pub async fn remove(&self, identifier: &str) -> Result<()> {
        let Some(instance) = self.entries.lock().remove(identifier) else {
            return Ok(());
        };
        gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
        instance.unsubscribe_from_channel().await
    }

    async fn perform_action(&self, identifier: &str, data: &str) -> Result<()> {
        let Some(instance) = self.find(identifier) else {
            warn!(identifier, "Unable to find subscription with identifier: {identifier}");
            return Ok(());
        };
        instance.perform_action(decode_action_data(data)?).await
    }

    /// Tear down every instance. Each one is independent, so a failure is
    /// logged and the rest still run.
    pub async fn unsubscribe_all(&self) {
        let instances: Vec<Arc<dyn ChannelInstance>> =
            self.entries.lock().drain().map(|(_, v)| v).collect();
        for instance in instances {
            gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
            if let Err(e) = instance.unsubscribe_from_channel().await {
                error!(
                    channel = instance.channel_name(),
                    identifier = instance.identifier(),
                    error = %e,
                    "unsubscribe failed"
                );
            }
        }
    }

    fn find(&self, identifier: &str) -> Option<Arc<dyn ChannelInstance>> {
        self.entries.lock().get(identifier).cloned()
    }

    /// Identifiers of live subscriptions (sorted).
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
