use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::constants::SLOT_COUNT;
use crate::metadata::MetadataStore;
use crate::metadata::Slot;
use crate::metadata::SlotState;
use crate::network::BackendClient;
use crate::network::ConnectionRegistry;
use crate::Result;
use crate::RoutingError;

/// `crc32(key) % SLOT_COUNT`, over the raw key bytes
pub fn slot_for_key(key: &[u8]) -> u32 {
    crc32fast::hash(key) % SLOT_COUNT
}

/// A cache server and the connection to reach it
#[derive(Clone)]
pub struct Endpoint {
    pub address: String,
    pub client: Arc<dyn BackendClient>,
}

impl fmt::Debug for Endpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Endpoint").field("address", &self.address).finish()
    }
}

/// Where a keyed request has to go
#[derive(Debug, Clone)]
pub enum Route {
    Normal {
        slot: u32,
        owner: Endpoint,
    },
    /// Slot is moving from `source` to `target`
    Migrating {
        slot: u32,
        source: Endpoint,
        target: Endpoint,
    },
}

impl Route {
    pub fn slot(&self) -> u32 {
        match self {
            Route::Normal { slot, .. } | Route::Migrating { slot, .. } => *slot,
        }
    }
}

/// Maps keys to live backend connections.
///
/// Slot records are read fresh from the metadata store on every call, so a
/// migration is observed by the very next request.
#[derive(Clone)]
pub struct SlotResolver {
    store: Arc<dyn MetadataStore>,
    registry: Arc<ConnectionRegistry>,
}

impl SlotResolver {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self { store, registry }
    }

    pub async fn resolve(
        &self,
        key: &[u8],
    ) -> Result<Route> {
        let slot_id = slot_for_key(key);
        let slot = Slot::fetch(self.store.as_ref(), slot_id)
            .await?
            .ok_or(RoutingError::UnassignedSlot(slot_id))?;
        debug!(slot = slot_id, owner = %slot.owner, migrating = slot.is_migrating(), "resolved slot");

        let owner = self.endpoint(&slot.owner)?;
        Ok(match slot.state {
            SlotState::Normal => Route::Normal { slot: slot_id, owner },
            SlotState::Migrating { target } => Route::Migrating {
                slot: slot_id,
                source: owner,
                target: self.endpoint(&target)?,
            },
        })
    }

    fn endpoint(
        &self,
        address: &str,
    ) -> Result<Endpoint> {
        let client = self
            .registry
            .get(address)
            .ok_or_else(|| RoutingError::ConnectionNotFound(address.to_string()))?;
        Ok(Endpoint {
            address: address.to_string(),
            client,
        })
    }
}
