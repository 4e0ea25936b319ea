//! # cable-core
//!
//! Foundation types shared by every cable crate.
//!
//! - **Errors**: [`CableError`] and [`BusError`] via `thiserror`, classified by [`ErrorCategory`]
//! - **Identity**: connection identifiers, identity strings, broadcasting names
//! - **Protocol**: client commands and server frames as they travel over the socket
//! - **Signal**: a one-shot completion latch used for opened/closed events
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod signal;

pub use errors::{BusError, CableError, ErrorCategory, Result};
pub use identity::{GlobalId, IdentifierValue, Identifiers, ToBroadcasting};
pub use signal::Signal;
