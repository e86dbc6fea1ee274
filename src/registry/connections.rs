use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::websocket::OutboundEvent;

use super::ConnectionHandle;

/// Manages all identified connections.
///
/// An entry exists exactly while a connection has identified and not yet
/// disconnected. The underlying map is never handed out; every reader and
/// writer goes through the methods below.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection under `id`. Inserts or overwrites; re-registering
    /// the same id replaces the previous entry.
    pub fn register(
        &self,
        id: Uuid,
        username: String,
        sender: mpsc::Sender<OutboundEvent>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(id, username, sender));
        self.connections.insert(id, handle.clone());

        tracing::info!(connection_id = %id, username = %handle.username, "Connection registered");

        handle
    }

    /// Remove the entry for `id`. A missing entry is not an error; disconnect
    /// detection can race with explicit close.
    pub fn unregister(&self, id: Uuid) {
        if let Some((_, handle)) = self.connections.remove(&id) {
            tracing::info!(
                connection_id = %id,
                username = %handle.username,
                "Connection unregistered"
            );
        }
    }

    /// Display name registered for `id`, if the connection is still online.
    pub fn lookup(&self, id: Uuid) -> Option<String> {
        self.connections.get(&id).map(|h| h.username.clone())
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Refresh the activity timestamp for `id`. No-op for unregistered ids.
    pub fn touch(&self, id: Uuid) {
        if let Some(handle) = self.connections.get(&id) {
            handle.update_activity();
        }
    }

    /// Snapshot of every registered connection.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Snapshot of every registered connection except `excluded`.
    ///
    /// Connections registering after the snapshot is taken are not included.
    pub fn snapshot_except(&self, excluded: Uuid) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .filter(|r| *r.key() != excluded)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Get statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.connections.len(),
        }
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove stale connections and return the count of removed connections
    pub fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let stale = self.find_stale_connections(timeout_secs);
        let count = stale.len();

        for conn_id in stale {
            tracing::info!(connection_id = %conn_id, "Removing stale connection due to timeout");
            self.unregister(conn_id);
        }

        count
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
}
