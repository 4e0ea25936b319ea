//! Channels: one logical subscription inside a connection.
//!
//! A channel type implements [`Channel`] and declares its actions, hooks
//! and periodic timers once in [`Channel::define`]. The resulting
//! [`ChannelDefinition`] is built when the type is registered with a
//! [`ChannelRegistry`] and shared by every instance.
//!
//! ```ignore
//! struct ChatChannel { room: String }
//!
//! #[async_trait]
//! impl Channel for ChatChannel {
//!     const NAME: &'static str = "ChatChannel";
//!
//!     fn new(params: &Params) -> Self { /* ... */ }
//!
//!     fn define(builder: &mut ChannelBuilder<Self>) {
//!         let _ = builder.action("speak", |chat, ctx, data| async move {
//!             ctx.server().broadcast(&format!("chat_{}", chat.room), &data).await
//!         });
//!     }
//!
//!     async fn subscribed(&self, ctx: &ChannelContext) -> Result<()> {
//!         ctx.stream_from(&format!("chat_{}", self.room)).await
//!     }
//! }
//! ```

pub mod builder;
pub mod context;
pub mod instance;
pub mod registry;
mod timer;

use async_trait::async_trait;
use cable_core::{CableError, Result};
use serde_json::{Map, Value};
use tracing::warn;

pub use builder::{ChannelBuilder, ChannelDefinition, RESERVED_ACTIONS};
pub use context::ChannelContext;
pub use instance::SubscribeOutcome;
pub use registry::ChannelRegistry;

/// Decoded subscription identifier, `channel` key included.
pub type Params = Map<String, Value>;

/// A channel type.
#[async_trait]
pub trait Channel: Send + Sync + Sized + 'static {
    /// Name clients put in the identifier's `channel` key.
    const NAME: &'static str;

    /// Build an instance from the subscription params. No hook runs yet.
    fn new(params: &Params) -> Self;

    /// Declare actions, hooks and periodic timers.
    fn define(_builder: &mut ChannelBuilder<Self>) {}

    /// Called once when the subscription is created.
    async fn subscribed(&self, _ctx: &ChannelContext) -> Result<()> {
        Ok(())
    }

    /// Called once when a confirmed subscription is torn down.
    async fn unsubscribed(&self, _ctx: &ChannelContext) -> Result<()> {
        Ok(())
    }

    /// Receives errors raised by periodic timer callbacks.
    fn report_periodic_timer_error(&self, ctx: &ChannelContext, error: &CableError) {
        warn!(
            channel = Self::NAME,
            identifier = ctx.identifier(),
            error = %error,
            "periodic timer failed"
        );
    }
}
