//! # cable-server
//!
//! The connection-side machinery of the cable gateway.
//!
//! - [`CableServer`]: composition root and Axum router (`/health`, `/metrics`, the cable endpoint)
//! - [`Connection`]: one WebSocket's open/message/close lifecycle
//! - [`channel`]: the [`Channel`] trait, per-type definitions and the runtime context
//! - [`WorkerPool`]: bounded execution of user callbacks, serialized per connection
//! - [`RemoteConnections`]: identity-addressed disconnects across processes

#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod connection;
pub mod connections;
pub mod handler;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod remote_connections;
pub mod request;
pub mod server;
pub mod shutdown;
pub mod socket;
pub mod subscriptions;
pub mod websocket;
pub mod worker;

pub use channel::{Channel, ChannelBuilder, ChannelContext, ChannelRegistry, Params};
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionStatistics};
pub use handler::{AnonymousHandler, ConnectionHandler};
pub use remote_connections::{RemoteConnection, RemoteConnections};
pub use request::{HandshakeRequest, HandshakeResponse};
pub use server::CableServer;
pub use worker::{ExceptionHandler, JobHandle, Lane, WorkerPool};
