//! Channel types known to a server, by name.

use std::collections::HashMap;
use std::sync::Arc;

use super::builder::ChannelDefinition;
use super::context::ChannelContext;
use super::instance::{ChannelInstance, TypedInstance};
use super::Channel;

/// Builds instances of one registered channel type.
pub(crate) trait ChannelFactory: Send + Sync {
    fn name(&self) -> &'static str;
    fn build(&self, ctx: ChannelContext) -> Arc<dyn ChannelInstance>;
    fn action_names(&self) -> Vec<String>;
}

struct TypedFactory<C: Channel> {
    definition: Arc<ChannelDefinition<C>>,
}

impl<C: Channel> ChannelFactory for TypedFactory<C> {
    fn name(&self) -> &'static str {
        C::NAME
    }

    fn build(&self, ctx: ChannelContext) -> Arc<dyn ChannelInstance> {
        Arc::new(TypedInstance::new(ctx, self.definition.clone()))
    }

    fn action_names(&self) -> Vec<String> {
        self.definition.action_names()
    }
}

/// Registry mapping channel names to their types.
#[derive(Default)]
pub struct ChannelRegistry {
    factories: HashMap<&'static str, Arc<dyn ChannelFactory>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `C` under [`Channel::NAME`], building its definition now.
    pub fn register<C: Channel>(&mut self) -> &mut Self {
        let factory = TypedFactory::<C> {
            definition: Arc::new(ChannelDefinition::of()),
        };
        let _ = self.factories.insert(C::NAME, Arc::new(factory));
        self
    }

    pub(crate) fn factory(&self, name: &str) -> Option<Arc<dyn ChannelFactory>> {
        self.factories.get(name).cloned()
    }

    /// Check whether a channel name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered channel names (sorted).
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Dispatchable actions of a registered channel.
    pub fn actions_of(&self, name: &str) -> Option<Vec<String>> {
        self.factories.get(name).map(|f| f.action_names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelBuilder, Params};

    struct ChatChannel;

    impl Channel for ChatChannel {
        const NAME: &'static str = "ChatChannel";

        fn new(_params: &Params) -> Self {
            Self
        }

        fn define(builder: &mut ChannelBuilder<Self>) {
            let _ = builder
                .action("speak", |_, _, _| async { Ok(()) })
                .action("leave", |_, _, _| async { Ok(()) });
        }
    }

    struct NotificationChannel;

    impl Channel for NotificationChannel {
        const NAME: &'static str = "NotificationChannel";

        fn new(_params: &Params) -> Self {
            Self
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ChannelRegistry::new();
        let _ = registry
            .register::<ChatChannel>()
            .register::<NotificationChannel>();

        assert!(registry.contains("ChatChannel"));
        assert!(!registry.contains("Chat"));
        assert!(registry.factory("NotificationChannel").is_some());
        assert_eq!(registry.names(), vec!["ChatChannel", "NotificationChannel"]);
    }

    #[test]
    fn actions_of_lists_sorted_actions() {
        let mut registry = ChannelRegistry::new();
        let _ = registry.register::<ChatChannel>();
        assert_eq!(
            registry.actions_of("ChatChannel"),
            Some(vec!["leave".to_owned(), "speak".to_owned()])
        );
        assert_eq!(registry.actions_of("Missing"), None);
    }
}
