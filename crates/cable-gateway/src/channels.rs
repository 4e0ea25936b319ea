//! Channels served by the gateway.

use std::time::Duration;

use async_trait::async_trait;
use cable_core::Result;
use cable_server::{Channel, ChannelBuilder, ChannelContext, ChannelRegistry, Params};
use serde_json::{Value, json};
use tracing::debug;

/// How often [`ChatChannel`] tells a subscriber who it is chatting as.
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(30);

/// Every channel the gateway exposes.
pub fn registry() -> ChannelRegistry {
    let mut registry = ChannelRegistry::new();
    let _ = registry
        .register::<ChatChannel>()
        .register::<NotificationsChannel>();
    registry
}

/// Topic a chat room broadcasts on.
pub fn room_topic(room: &str) -> String {
    format!("chat_{room}")
}

fn room_param(params: &Params) -> String {
    match params.get("room") {
        Some(Value::String(room)) => room.clone(),
        Some(Value::Number(room)) => room.to_string(),
        _ => "lobby".into(),
    }
}

fn current_user(ctx: &ChannelContext) -> String {
    ctx.connection_identifier("current_user")
        .map_or_else(|| "anonymous".into(), |value| value.to_param())
}

/// Room chat: `{"channel": "ChatChannel", "room": "..."}`.
///
/// Clients perform `speak` with a `message`; every subscriber of the room,
/// on any gateway sharing the bus, receives `{"user", "message"}`.
pub struct ChatChannel {
    room: String,
}

impl ChatChannel {
    fn topic(&self) -> String {
        room_topic(&self.room)
    }
}

#[async_trait]
impl Channel for ChatChannel {
    const NAME: &'static str = "ChatChannel";

    fn new(params: &Params) -> Self {
        Self {
            room: room_param(params),
        }
    }

    fn define(builder: &mut ChannelBuilder<Self>) {
        let _ = builder
            .action("speak", |chat, ctx, data| async move {
                let message = data.get("message").cloned().unwrap_or(Value::Null);
                let user = current_user(&ctx);
                ctx.server()
                    .broadcast(&chat.topic(), &json!({ "user": user, "message": message }))
                    .await
            })
            .periodically(PRESENCE_INTERVAL, |chat, ctx| async move {
                ctx.transmit(&json!({
                    "type": "presence",
                    "room": chat.room,
                    "user": current_user(&ctx),
                }))
            });
    }

    async fn subscribed(&self, ctx: &ChannelContext) -> Result<()> {
        debug!(room = %self.room, "joining chat room");
        ctx.stream_from(&self.topic()).await
    }
}

/// Per-user notifications: `{"channel": "NotificationsChannel"}`.
///
/// Anonymous connections are rejected.
pub struct NotificationsChannel;

#[async_trait]
impl Channel for NotificationsChannel {
    const NAME: &'static str = "NotificationsChannel";

    fn new(_params: &Params) -> Self {
        Self
    }

    async fn subscribed(&self, ctx: &ChannelContext) -> Result<()> {
        match ctx.connection_identifier("current_user") {
            Some(user) => ctx.stream_for(&user).await,
            None => {
                ctx.reject();
                Ok(())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }

    #[test]
    fn registry_exposes_both_channels() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["ChatChannel", "NotificationsChannel"]);
        assert_eq!(registry.actions_of("ChatChannel"), Some(vec!["speak".to_owned()]));
    }

    #[test]
    fn room_defaults_to_lobby() {
        assert_eq!(ChatChannel::new(&Params::new()).topic(), "chat_lobby");
    }

    #[test]
    fn numeric_room_is_stringified() {
        let chat = ChatChannel::new(&params(json!({ "room": 42 })));
        assert_eq!(chat.topic(), "chat_42");
    }

    #[test]
    fn string_room() {
        let chat = ChatChannel::new(&params(json!({ "room": "rust" })));
        assert_eq!(chat.topic(), room_topic("rust"));
    }
}
