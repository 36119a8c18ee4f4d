//! Connection registry
//!
//! The authoritative set of live connections. Broadcasts work on
//! snapshots so concurrent register/deregister never touches the set
//! being iterated.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::connection::Connection;
use crate::error::RelayError;
use crate::types::ConnectionId;

/// Registry of open and draining connections
///
/// Keyed by `ConnectionId` in a `BTreeMap`, so snapshots enumerate
/// connections in a stable order.
#[derive(Debug, Default)]
pub struct Registry {
    connections: RwLock<BTreeMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection
    ///
    /// Fails with `DuplicateId` if the id is taken, and with
    /// `ConnectionClosed` if the connection already reached Closed.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), RelayError> {
        let id = connection.id();
        let mut connections = self.connections.write();

        if connections.contains_key(&id) {
            return Err(RelayError::DuplicateId(id));
        }
        if connection.is_closed() {
            return Err(RelayError::ConnectionClosed(id));
        }

        connections.insert(id, connection);
        debug!("Registered {}, total connections: {}", id, connections.len());
        Ok(())
    }

    /// Remove a connection, returning it if it was present
    ///
    /// Absent ids are not an error: disconnect races are expected.
    pub fn deregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write();
        let removed = connections.remove(&id);
        if removed.is_some() {
            debug!("Deregistered {}, total connections: {}", id, connections.len());
        }
        removed
    }

    /// Point-in-time copy of the registered connections
    ///
    /// Connections that closed but have not been deregistered yet are
    /// left out.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|connection| !connection.is_closed())
            .cloned()
            .collect()
    }

    /// Look up a live connection; closed ones are treated as gone
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .get(&id)
            .filter(|connection| !connection.is_closed())
            .cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|connection| !connection.is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` still has an entry, closed or not
    ///
    /// A closed connection keeps its entry until its session task
    /// deregisters it.
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Remove and return every connection (used on shutdown)
    pub fn drain_all(&self) -> Vec<Arc<Connection>> {
        let connections = std::mem::take(&mut *self.connections.write());
        connections.into_values().collect()
    }
}
