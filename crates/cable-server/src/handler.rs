//! Application hooks for connection authorization and identification.

use std::sync::Arc;

use async_trait::async_trait;
use cable_core::{Identifiers, Result};

use crate::connection::Connection;
use crate::worker::ExceptionHandler;

/// Decides who a connection is and whether it may stay open.
///
/// One handler serves every connection of a server. `connect` and
/// `disconnect` run on the connection's worker lane.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Identifier names `connect` may return.
    fn identified_by(&self) -> &[&'static str] {
        &[]
    }

    /// Authorize and identify a new connection.
    ///
    /// Return [`CableError::Unauthorized`](cable_core::CableError::Unauthorized)
    /// (see [`reject_unauthorized_connection`](cable_core::errors::reject_unauthorized_connection))
    /// to refuse it; `disconnect` is then never called.
    async fn connect(&self, _connection: &Connection) -> Result<Identifiers> {
        Ok(Identifiers::new())
    }

    /// Called once when a connected client goes away.
    async fn disconnect(&self, _connection: &Connection) -> Result<()> {
        Ok(())
    }

    /// Receives errors from jobs run on this connection's behalf.
    fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>> {
        None
    }
}

/// Accepts everyone and identifies no one.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousHandler;

impl ConnectionHandler for AnonymousHandler {}
