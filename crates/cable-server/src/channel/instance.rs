//! A subscribed channel: the user's channel value bound to its context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cable_core::Result;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, info};

use super::builder::ChannelDefinition;
use super::context::ChannelContext;
use super::timer::{Occurrence, PeriodicTimer};
use super::Channel;
use crate::worker::catch_panic;

/// Result of a subscribe sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The subscription stands.
    Confirmed,
    /// The channel refused it; nothing was left running.
    Rejected,
}

/// Type-erased view of a channel instance, as the subscriptions registry sees it.
#[async_trait]
pub trait ChannelInstance: Send + Sync {
    /// Client-chosen key.
    fn identifier(&self) -> &str;

    /// Registered channel type name.
    fn channel_name(&self) -> &'static str;

    /// Start timers, run on-subscribe hooks, then `subscribed`.
    async fn subscribe_to_channel(&self) -> SubscribeOutcome;

    /// Stop timers and streams, then run `unsubscribed` and on-unsubscribe hooks.
    async fn unsubscribe_from_channel(&self) -> Result<()>;

    /// Dispatch a decoded `{"action": ..}` payload.
    async fn perform_action(&self, data: Value) -> Result<()>;
}

pub(crate) struct TypedInstance<C: Channel> {
    channel: Arc<C>,
    ctx: ChannelContext,
    definition: Arc<ChannelDefinition<C>>,
    timers: Mutex<Vec<PeriodicTimer>>,
    subscribed: AtomicBool,
    unsubscribed: AtomicBool,
}

impl<C: Channel> TypedInstance<C> {
    pub(crate) fn new(ctx: ChannelContext, definition: Arc<ChannelDefinition<C>>) -> Self {
        let channel = Arc::new(C::new(ctx.params()));
        Self {
            channel,
            ctx,
            definition,
            timers: Mutex::new(Vec::new()),
            subscribed: AtomicBool::new(false),
            unsubscribed: AtomicBool::new(false),
        }
    }

    // Occurrences go through the connection's lane so they serialize with actions.
    fn start_periodic_timers(&self) {
        let timers = self
            .definition
            .timers
            .iter()
            .map(|(every, callback)| {
                let channel = self.channel.clone();
                let ctx = self.ctx.clone();
                let callback = callback.clone();
                let occurrence: Occurrence = Arc::new(move || {
                    let channel = channel.clone();
                    let ctx = ctx.clone();
                    let run = callback(channel.clone(), ctx.clone());
                    async move {
                        if let Err(e) = run.await {
                            channel.report_periodic_timer_error(&ctx, &e);
                        }
                    }
                    .boxed()
                });
                PeriodicTimer::start(*every, self.ctx.lane().clone(), occurrence)
            })
            .collect();
        *self.timers.lock() = timers;
    }

    async fn stop_periodic_timers(&self) {
        let timers = std::mem::take(&mut *self.timers.lock());
        for timer in &timers {
            timer.stop().await;
        }
    }

    async fn teardown_rejected(&self) -> SubscribeOutcome {
        self.stop_periodic_timers().await;
        self.ctx.stop_all_streams().await;
        info!(
            channel = C::NAME,
            identifier = self.ctx.identifier(),
            "{} is transmitting the subscription rejection",
            C::NAME
        );
        SubscribeOutcome::Rejected
    }
}

#[async_trait]
impl<C: Channel> ChannelInstance for TypedInstance<C> {
    fn identifier(&self) -> &str {
        self.ctx.identifier()
    }

    fn channel_name(&self) -> &'static str {
        C::NAME
    }

    async fn subscribe_to_channel(&self) -> SubscribeOutcome {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return SubscribeOutcome::Confirmed;
        }
        self.start_periodic_timers();

        for hook in &self.definition.on_subscribe {
            if let Err(e) = catch_panic(hook(self.channel.clone(), self.ctx.clone())).await {
                error!(channel = C::NAME, error = %e, "on-subscribe hook failed");
                self.ctx.reject();
            }
            if self.ctx.is_rejected() {
                return self.teardown_rejected().await;
            }
        }

        if let Err(e) = catch_panic(self.channel.subscribed(&self.ctx)).await {
            error!(channel = C::NAME, error = %e, "subscribed failed");
            self.ctx.reject();
        }
        if self.ctx.is_rejected() {
            return self.teardown_rejected().await;
        }

        info!(
            channel = C::NAME,
            identifier = self.ctx.identifier(),
            "{} is transmitting the subscription confirmation",
            C::NAME
        );
        SubscribeOutcome::Confirmed
    }

    async fn unsubscribe_from_channel(&self) -> Result<()> {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_periodic_timers().await;
        self.ctx.stop_all_streams().await;

        let mut outcome = catch_panic(self.channel.unsubscribed(&self.ctx)).await;
        for hook in &self.definition.on_unsubscribe {
            if let Err(e) = catch_panic(hook(self.channel.clone(), self.ctx.clone())).await {
                error!(channel = C::NAME, error = %e, "on-unsubscribe hook failed");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    async fn perform_action(&self, data: Value) -> Result<()> {
        let action = data
            .get("action")
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty())
            .unwrap_or("receive")
            .to_owned();

        let Some(handler) = self.definition.actions.get(&action) else {
            error!(
                channel = C::NAME,
                action = %action,
                "Unable to process {}#{}({})",
                C::NAME,
                action,
                data
            );
            return Ok(());
        };

        info!("{}#{}({})", C::NAME, action, data);
        handler(self.channel.clone(), self.ctx.clone(), data).await
    }
}
