use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::constants::SLOT_COUNT;
use crate::constants::SLOT_PREFIX;
use crate::metadata::cache_server_key;
use crate::metadata::decode_record;
use crate::metadata::CacheServerNode;
use crate::metadata::MetadataStore;
use crate::metadata::NodeState;
use crate::metadata::Slot;
use crate::MigrationError;
use crate::Result;

pub(crate) fn check_slot(slot_id: u32) -> Result<()> {
    if slot_id >= SLOT_COUNT {
        return Err(MigrationError::SlotOutOfRange(slot_id).into());
    }
    Ok(())
}

/// Node and slot bookkeeping on top of a [`MetadataStore`]
#[derive(Clone)]
pub struct ClusterAdmin {
    store: Arc<dyn MetadataStore>,
}

impl ClusterAdmin {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Registers (or re-registers) a node in NORMAL state
    pub async fn register_node(
        &self,
        id: u32,
        address: impl Into<String>,
    ) -> Result<CacheServerNode> {
        let node = CacheServerNode::new(id, address);
        self.store.put(&node.key(), node.encode()?).await?;
        info!(node_id = id, address = %node.address, "registered cache server");
        Ok(node)
    }

    /// Returns whether the node was registered
    pub async fn deregister_node(
        &self,
        id: u32,
    ) -> Result<bool> {
        let removed = self.store.delete(&cache_server_key(id)).await?;
        if removed {
            info!(node_id = id, "deregistered cache server");
        }
        Ok(removed)
    }

    pub async fn get_node(
        &self,
        id: u32,
    ) -> Result<Option<CacheServerNode>> {
        let key = cache_server_key(id);
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(CacheServerNode::decode(&key, &value)?)),
            None => Ok(None),
        }
    }

    pub async fn set_node_state(
        &self,
        id: u32,
        state: NodeState,
    ) -> Result<CacheServerNode> {
        let mut node = self
            .get_node(id)
            .await?
            .ok_or_else(|| MigrationError::NodeNotRegistered(id.to_string()))?;
        node.state = state;
        self.store.put(&node.key(), node.encode()?).await?;
        info!(node_id = id, ?state, "cache server state changed");
        Ok(node)
    }

    /// Registered nodes ordered by id
    pub async fn list_nodes(&self) -> Result<Vec<CacheServerNode>> {
        let mut nodes: Vec<CacheServerNode> = CacheServerNode::list(self.store.as_ref())
            .await?
            .into_iter()
            .map(|(_, node)| node)
            .collect();
        nodes.sort_by_key(|node| node.id);
        Ok(nodes)
    }

    /// The serving node announced at `address`, if any
    pub async fn find_node(
        &self,
        address: &str,
    ) -> Result<Option<CacheServerNode>> {
        Ok(self
            .list_nodes()
            .await?
            .into_iter()
            .find(|node| node.address == address && node.state.is_serving()))
    }

    /// Assigns `start..=end` to `owner`. Slots in the middle of a migration
    /// are refused, the whole range is checked before anything is written.
    pub async fn assign_slots(
        &self,
        start: u32,
        end: u32,
        owner: &str,
    ) -> Result<usize> {
        if start > end {
            return Err(MigrationError::InvalidRange { start, end }.into());
        }
        check_slot(end)?;
        if self.find_node(owner).await?.is_none() {
            return Err(MigrationError::NodeNotRegistered(owner.to_string()).into());
        }

        for slot_id in start..=end {
            if let Some(slot) = Slot::fetch(self.store.as_ref(), slot_id).await? {
                if slot.is_migrating() {
                    return Err(MigrationError::AlreadyMigrating(slot_id).into());
                }
            }
        }

        for slot_id in start..=end {
            let slot = Slot::normal(slot_id, owner);
            self.store.put(&slot.key(), slot.encode()?).await?;
        }
        let assigned = (end - start + 1) as usize;
        info!(start, end, owner, "assigned {} slots", assigned);
        Ok(assigned)
    }

    /// Splits the whole slot space into contiguous, near-equal ranges, one
    /// per address in order.
    pub async fn assign_evenly(
        &self,
        owners: &[String],
    ) -> Result<()> {
        if owners.is_empty() {
            return Ok(());
        }
        let count = owners.len() as u32;
        let share = SLOT_COUNT / count;
        let extra = SLOT_COUNT % count;
        let mut start = 0;
        for (i, owner) in owners.iter().enumerate() {
            let len = share + u32::from((i as u32) < extra);
            if len == 0 {
                continue;
            }
            self.assign_slots(start, start + len - 1, owner).await?;
            start += len;
        }
        Ok(())
    }

    pub async fn get_slot(
        &self,
        slot_id: u32,
    ) -> Result<Option<Slot>> {
        check_slot(slot_id)?;
        Slot::fetch(self.store.as_ref(), slot_id).await
    }

    /// Assigned slots ordered by id
    pub async fn list_slots(&self) -> Result<Vec<Slot>> {
        let mut slots = Vec::new();
        for (key, value) in self.store.get_prefix(SLOT_PREFIX).await? {
            slots.push(decode_record::<Slot>(&key, &value)?);
        }
        slots.sort_by_key(|slot| slot.id);
        Ok(slots)
    }

    /// Slot ids per owner address. Migrating slots count for their source.
    pub async fn slots_by_owner(&self) -> Result<BTreeMap<String, Vec<u32>>> {
        let mut owners: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for slot in self.list_slots().await? {
            owners.entry(slot.owner).or_default().push(slot.id);
        }
        Ok(owners)
    }
}
