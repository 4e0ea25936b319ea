//! Registry of connections open in this process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::connection::{Connection, ConnectionStatistics};

/// Connected clients indexed by connection id.
pub struct OpenConnections {
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
}

impl OpenConnections {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<Connection>) {
        let mut conns = self.connections.write().await;
        debug!(connection_id = %connection.id(), "connection registered");
        let _ = conns.insert(connection.id(), connection);
    }

    /// Remove a connection by id.
    pub async fn remove(&self, id: Uuid) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(&id);
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Every open connection.
    pub async fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Statistics of every open connection, oldest first.
    pub async fn statistics(&self) -> Vec<ConnectionStatistics> {
        let mut stats: Vec<ConnectionStatistics> = self
            .connections
            .read()
            .await
            .values()
            .map(|c| c.statistics())
            .collect();
        stats.sort_by_key(|s| s.started_at);
        stats
    }
}

impl Default for OpenConnections {
    fn default() -> Self {
        Self::new()
    }
}
