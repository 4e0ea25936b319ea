//! Reach connections by identity, in this process or any other sharing the bus.
//!
//! ```ignore
//! server
//!     .remote_connections()
//!     .where_identified(Identifiers::new().with("current_user", GlobalId::new("User", 7)))?
//!     .disconnect()
//!     .await?;
//! ```

use std::sync::Arc;

use cable_core::identity::internal_topic;
use cable_core::protocol::InternalMessage;
use cable_core::{CableError, Identifiers, Result};
use tracing::info;

use crate::server::CableServer;

/// Entry point for identity-addressed operations.
pub struct RemoteConnections<'a> {
    server: &'a Arc<CableServer>,
}

impl<'a> RemoteConnections<'a> {
    pub(crate) fn new(server: &'a Arc<CableServer>) -> Self {
        Self { server }
    }

    /// The connection(s) carrying exactly `identifiers`.
    ///
    /// Every name must be declared by the server's connection handler.
    pub fn where_identified(&self, identifiers: Identifiers) -> Result<RemoteConnection> {
        let declared = self.server.handler().identified_by();
        let undeclared: Vec<String> = identifiers
            .names()
            .filter(|name| !declared.contains(name))
            .map(ToOwned::to_owned)
            .collect();
        if identifiers.is_empty() || !undeclared.is_empty() {
            return Err(CableError::InvalidIdentifiers(undeclared));
        }
        Ok(RemoteConnection {
            server: self.server.clone(),
            identifiers,
        })
    }
}

/// A possibly-remote connection addressed by identity.
pub struct RemoteConnection {
    server: Arc<CableServer>,
    identifiers: Identifiers,
}

impl RemoteConnection {
    /// The identifiers this handle targets.
    pub fn identifiers(&self) -> &Identifiers {
        &self.identifiers
    }

    /// Identity string the target connection carries.
    pub fn identity(&self) -> String {
        self.identifiers.identity()
    }

    /// Ask whichever process holds the connection to close it. No acknowledgement.
    pub async fn disconnect(&self) -> Result<()> {
        let topic = internal_topic(&self.identity());
        info!(topic, "Removing connection ({})", self.identity());
        self.server
            .broadcast(&topic, &InternalMessage::Disconnect)
            .await
    }
}
