use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::ConnectionHandle;
use crate::error::{Result, ServerError};
use crate::server_types::ConnectionId;

/// Membership set of live connections, keyed by server assigned id.
///
/// Every mutation and every snapshot runs under the one mutex; the lock is
/// only held long enough to touch the map, never across socket I/O.
#[derive(Clone)]
pub struct Registry {
    clients: Arc<Mutex<BTreeMap<ConnectionId, Arc<ConnectionHandle>>>>,
    max_connections: usize,
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        Registry {
            clients: Arc::new(Mutex::new(BTreeMap::new())),
            max_connections,
        }
    }

    /// Register a handle and make it eligible as a broadcast recipient.
    ///
    /// Refuses with `ServerError::AtCapacity` once `max_connections` handles
    /// are registered, and `ServerError::ConnectionClosed` if the handle
    /// already left `Connecting`.
    pub async fn add(&self, handle: Arc<ConnectionHandle>) -> Result<()> {
        let mut clients = self.clients.lock().await;

        if clients.len() >= self.max_connections {
            return Err(ServerError::AtCapacity(self.max_connections))
        }

        // activate under the lock so a snapshot never sees a half registered handle
        if !handle.activate() {
            return Err(ServerError::ConnectionClosed(handle.id()))
        }

        debug!("registering connection {}", handle.id());
        clients.insert(handle.id(), handle);
        Ok(())
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.clients.lock().await.remove(&id)
    }

    /// Point in time copy of the current broadcast recipients, ordered by id.
    ///
    /// Handles that already started closing are left out, though one may
    /// still start closing right after the copy is taken.
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.clients.lock().await
            .values()
            .filter(|h| h.is_active())
            .cloned()
            .collect()
    }

    // every registered handle regardless of state, for shutdown
    pub async fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.clients.lock().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.clients.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
