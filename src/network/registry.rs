use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::BackendClient;

/// Address keyed table of live backend connections.
///
/// Owned by the proxy and shared between the metadata watcher (writer) and
/// request routing (reader). At most one connection exists per address.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<dyn BackendClient>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `conn` for `address`, closing the connection it replaces
    pub fn add(
        &self,
        address: impl Into<String>,
        conn: Arc<dyn BackendClient>,
    ) {
        let address = address.into();
        debug!(%address, "registering backend connection");
        if let Some(previous) = self.connections.insert(address, conn.clone()) {
            if !Arc::ptr_eq(&previous, &conn) {
                previous.close();
            }
        }
    }

    /// Closes and forgets the connection for `address`. Returns whether one
    /// existed.
    pub fn remove(
        &self,
        address: &str,
    ) -> bool {
        match self.connections.remove(address) {
            Some((_, conn)) => {
                debug!(address, "removing backend connection");
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Pure lookup, never dials
    pub fn get(
        &self,
        address: &str,
    ) -> Option<Arc<dyn BackendClient>> {
        self.connections.get(address).map(|entry| entry.value().clone())
    }

    pub fn contains(
        &self,
        address: &str,
    ) -> bool {
        self.connections.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Registered addresses, sorted
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        addresses.sort();
        addresses
    }

    /// Closes every connection
    pub fn clear(&self) {
        for address in self.addresses() {
            self.remove(&address);
        }
    }
}
