use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use super::MetadataStore;
use crate::constants::CACHE_SERVER_PREFIX;
use crate::constants::SLOT_PREFIX;
use crate::MetadataError;
use crate::Result;

pub fn slot_key(slot_id: u32) -> String {
    format!("{SLOT_PREFIX}{slot_id}")
}

pub fn cache_server_key(node_id: u32) -> String {
    format!("{CACHE_SERVER_PREFIX}{node_id}")
}

pub(crate) fn decode_record<T: DeserializeOwned>(
    key: &str,
    value: &[u8],
) -> std::result::Result<T, MetadataError> {
    serde_json::from_slice(value).map_err(|e| MetadataError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn encode_record<T: Serialize>(
    key: &str,
    value: &T,
) -> std::result::Result<Bytes, MetadataError> {
    serde_json::to_vec(value).map(Bytes::from).map_err(|e| MetadataError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Migration state of a slot. The target only exists while migrating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Normal,
    Migrating { target: String },
}

/// Ownership record of one slot, stored under `/slot/<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SlotRecord", into = "SlotRecord")]
pub struct Slot {
    pub id: u32,
    /// Address of the owning cache server
    pub owner: String,
    pub state: SlotState,
}

/// Wire shape: `{"id", "types": 1|2, "ip", "new_ip"}`
#[derive(Serialize, Deserialize)]
struct SlotRecord {
    id: u32,
    types: u8,
    ip: String,
    #[serde(default)]
    new_ip: String,
}

const SLOT_NORMAL: u8 = 1;
const SLOT_MIGRATE: u8 = 2;

impl TryFrom<SlotRecord> for Slot {
    type Error = String;

    fn try_from(record: SlotRecord) -> std::result::Result<Self, Self::Error> {
        let state = match record.types {
            SLOT_NORMAL => SlotState::Normal,
            SLOT_MIGRATE if record.new_ip.is_empty() => {
                return Err(format!("slot {} is migrating without a target", record.id));
            }
            SLOT_MIGRATE => SlotState::Migrating { target: record.new_ip },
            other => return Err(format!("unknown slot state {other}")),
        };
        Ok(Slot {
            id: record.id,
            owner: record.ip,
            state,
        })
    }
}

impl From<Slot> for SlotRecord {
    fn from(slot: Slot) -> Self {
        let (types, new_ip) = match slot.state {
            SlotState::Normal => (SLOT_NORMAL, String::new()),
            SlotState::Migrating { target } => (SLOT_MIGRATE, target),
        };
        SlotRecord {
            id: slot.id,
            types,
            ip: slot.owner,
            new_ip,
        }
    }
}

impl Slot {
    pub fn normal(
        id: u32,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner: owner.into(),
            state: SlotState::Normal,
        }
    }

    pub fn migrating(
        id: u32,
        owner: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner: owner.into(),
            state: SlotState::Migrating { target: target.into() },
        }
    }

    pub fn is_migrating(&self) -> bool {
        matches!(self.state, SlotState::Migrating { .. })
    }

    pub fn target(&self) -> Option<&str> {
        match &self.state {
            SlotState::Normal => None,
            SlotState::Migrating { target } => Some(target),
        }
    }

    pub fn key(&self) -> String {
        slot_key(self.id)
    }

    pub fn encode(&self) -> std::result::Result<Bytes, MetadataError> {
        encode_record(&self.key(), self)
    }

    /// Fetches `/slot/<id>` fresh from the store
    pub async fn fetch(
        store: &dyn MetadataStore,
        slot_id: u32,
    ) -> Result<Option<Slot>> {
        let key = slot_key(slot_id);
        match store.get(&key).await? {
            Some(value) => Ok(Some(decode_record(&key, &value)?)),
            None => Ok(None),
        }
    }
}

/// Lifecycle state of a registered cache server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NodeState {
    Normal,
    Offline,
    /// Taking part in a slot migration, still serving traffic
    Migrate,
}

impl NodeState {
    /// Whether the proxy should hold a connection to a node in this state
    pub fn is_serving(self) -> bool {
        !matches!(self, NodeState::Offline)
    }
}

impl TryFrom<u8> for NodeState {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(NodeState::Normal),
            2 => Ok(NodeState::Offline),
            3 => Ok(NodeState::Migrate),
            other => Err(format!("unknown node state {other}")),
        }
    }
}

impl From<NodeState> for u8 {
    fn from(state: NodeState) -> Self {
        match state {
            NodeState::Normal => 1,
            NodeState::Offline => 2,
            NodeState::Migrate => 3,
        }
    }
}

/// Registration record of a cache server, stored under `/cacheserver/<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheServerNode {
    pub id: u32,
    #[serde(rename = "types")]
    pub state: NodeState,
    /// `host:port` the node's backend listener is reachable on
    #[serde(rename = "ip")]
    pub address: String,
}

impl CacheServerNode {
    pub fn new(
        id: u32,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            state: NodeState::Normal,
            address: address.into(),
        }
    }

    pub fn key(&self) -> String {
        cache_server_key(self.id)
    }

    pub fn encode(&self) -> std::result::Result<Bytes, MetadataError> {
        encode_record(&self.key(), self)
    }

    pub fn decode(
        key: &str,
        value: &[u8],
    ) -> std::result::Result<Self, MetadataError> {
        decode_record(key, value)
    }

    /// Enumerates every record under `/cacheserver/`
    pub async fn list(store: &dyn MetadataStore) -> Result<Vec<(String, CacheServerNode)>> {
        let mut nodes = Vec::new();
        for (key, value) in store.get_prefix(CACHE_SERVER_PREFIX).await? {
            let node = Self::decode(&key, &value)?;
            nodes.push((key, node));
        }
        Ok(nodes)
    }
}
