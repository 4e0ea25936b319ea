//! Per-type channel declarations.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cable_core::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use super::Channel;
use super::context::ChannelContext;

/// Names the base channel machinery already uses. Declaring an action
/// under one of these is ignored unless done through
/// [`ChannelBuilder::redefine`].
pub const RESERVED_ACTIONS: &[&str] = &[
    "subscribed",
    "unsubscribed",
    "subscribe_to_channel",
    "unsubscribe_from_channel",
    "perform_action",
    "transmit",
    "stream_from",
    "stream_for",
    "stop_all_streams",
    "reject",
    "params",
    "identifier",
    "connection",
    "broadcast_to",
    "broadcasting_for",
    "periodically",
    "new",
    "define",
];

pub(crate) type ActionFn<C> =
    Arc<dyn Fn(Arc<C>, ChannelContext, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub(crate) type HookFn<C> =
    Arc<dyn Fn(Arc<C>, ChannelContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Collects the declarations of one channel type.
pub struct ChannelBuilder<C> {
    actions: HashMap<String, ActionFn<C>>,
    on_subscribe: Vec<HookFn<C>>,
    on_unsubscribe: Vec<HookFn<C>>,
    timers: Vec<(Duration, HookFn<C>)>,
}

impl<C: Channel> ChannelBuilder<C> {
    pub(crate) fn new() -> Self {
        Self {
            actions: HashMap::new(),
            on_subscribe: Vec::new(),
            on_unsubscribe: Vec::new(),
            timers: Vec::new(),
        }
    }

    /// Expose `name` as an action clients may perform.
    ///
    /// `data` is the whole decoded payload, `action` key included.
    pub fn action<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<C>, ChannelContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if RESERVED_ACTIONS.contains(&name) {
            warn!(
                channel = C::NAME,
                action = name,
                "action name is reserved, use redefine to expose it"
            );
            return self;
        }
        self.redefine(name, handler)
    }

    /// Expose `name` even if it shadows a reserved name.
    pub fn redefine<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<C>, ChannelContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: ActionFn<C> = Arc::new(move |c, ctx, data| handler(c, ctx, data).boxed());
        let _ = self.actions.insert(name.to_owned(), handler);
        self
    }

    /// Run `hook` on subscribe, after previously registered hooks.
    pub fn on_subscribe<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Arc<C>, ChannelContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_subscribe.push(boxed_hook(hook));
        self
    }

    /// Run `hook` on unsubscribe, after previously registered hooks.
    pub fn on_unsubscribe<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Arc<C>, ChannelContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_unsubscribe.push(boxed_hook(hook));
        self
    }

    /// Run `callback` every `every` while subscribed.
    pub fn periodically<F, Fut>(&mut self, every: Duration, callback: F) -> &mut Self
    where
        F: Fn(Arc<C>, ChannelContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.timers.push((every, boxed_hook(callback)));
        self
    }

    pub(crate) fn build(self) -> ChannelDefinition<C> {
        ChannelDefinition {
            actions: self.actions,
            on_subscribe: self.on_subscribe,
            on_unsubscribe: self.on_unsubscribe,
            timers: self.timers,
        }
    }
}

fn boxed_hook<C, F, Fut>(hook: F) -> HookFn<C>
where
    F: Fn(Arc<C>, ChannelContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |c, ctx| hook(c, ctx).boxed())
}

/// The frozen declarations of one channel type.
pub struct ChannelDefinition<C> {
    pub(crate) actions: HashMap<String, ActionFn<C>>,
    pub(crate) on_subscribe: Vec<HookFn<C>>,
    pub(crate) on_unsubscribe: Vec<HookFn<C>>,
    pub(crate) timers: Vec<(Duration, HookFn<C>)>,
}

impl<C: Channel> ChannelDefinition<C> {
    /// Run [`Channel::define`] and freeze the result.
    pub fn of() -> Self {
        let mut builder = ChannelBuilder::new();
        C::define(&mut builder);
        builder.build()
    }

    /// Dispatchable action names, sorted.
    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` is dispatchable.
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Declared periodic intervals, in declaration order.
    pub fn timer_intervals(&self) -> Vec<Duration> {
        self.timers.iter().map(|(every, _)| *every).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Params;

    struct Probe;

    impl Channel for Probe {
        const NAME: &'static str = "ProbeChannel";

        fn new(_params: &Params) -> Self {
            Self
        }

        fn define(builder: &mut ChannelBuilder<Self>) {
            let _ = builder
                .action("speak", |_, _, _| async { Ok(()) })
                .action("subscribed", |_, _, _| async { Ok(()) })
                .action("transmit", |_, _, _| async { Ok(()) })
                .redefine("stream_from", |_, _, _| async { Ok(()) })
                .on_subscribe(|_, _| async { Ok(()) })
                .on_unsubscribe(|_, _| async { Ok(()) })
                .periodically(Duration::from_secs(5), |_, _| async { Ok(()) })
                .periodically(Duration::from_millis(100), |_, _| async { Ok(()) });
        }
    }

    #[test]
    fn reserved_names_are_not_dispatchable() {
        let def = ChannelDefinition::<Probe>::of();
        assert!(def.has_action("speak"));
        assert!(!def.has_action("subscribed"));
        assert!(!def.has_action("transmit"));
    }

    #[test]
    fn redefine_exposes_reserved_name() {
        let def = ChannelDefinition::<Probe>::of();
        assert!(def.has_action("stream_from"));
        assert_eq!(def.action_names(), vec!["speak", "stream_from"]);
    }

    #[test]
    fn hooks_and_timers_are_collected() {
        let def = ChannelDefinition::<Probe>::of();
        assert_eq!(def.on_subscribe.len(), 1);
        assert_eq!(def.on_unsubscribe.len(), 1);
        assert_eq!(
            def.timer_intervals(),
            vec![Duration::from_secs(5), Duration::from_millis(100)]
        );
    }

    struct Bare;

    impl Channel for Bare {
        const NAME: &'static str = "BareChannel";

        fn new(_params: &Params) -> Self {
            Self
        }
    }

    #[test]
    fn default_definition_is_empty() {
        let def = ChannelDefinition::<Bare>::of();
        assert!(def.action_names().is_empty());
        assert!(def.timer_intervals().is_empty());
    }
}
