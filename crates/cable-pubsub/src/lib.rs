//! # cable-pubsub
//!
//! The bridge between connections and the shared message bus.
//!
//! - [`PubSubBus`]: the bus collaborator (`publish`/`subscribe`/`unsubscribe`)
//! - [`MemoryBus`]: in-process bus, shareable between several servers
//! - [`TopicMultiplexer`]: ref-counts local interest so one topic costs one
//!   bus subscription no matter how many channels stream it
//! - [`Broadcasting`]: per-topic [`Broadcaster`] cache that encodes and publishes

#![deny(unsafe_code)]

pub mod broadcaster;
pub mod bus;
pub mod memory;
pub mod multiplexer;

pub use broadcaster::{Broadcaster, Broadcasting};
pub use bus::{BusHandle, MessageCallback, PubSubBus};
pub use memory::{MemoryBus, RecordingBus};
pub use multiplexer::{StreamHandle, TopicMultiplexer};

/// Messages handed to the bus (counter).
pub const BROADCASTS_TOTAL: &str = "cable_broadcasts_total";
/// Bus-level topic subscriptions (gauge).
pub const BUS_SUBSCRIPTIONS_ACTIVE: &str = "cable_bus_subscriptions_active";
