use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Event type for watch notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventType {
    /// Key was inserted or updated
    Put,
    /// Key was deleted
    Delete,
}

/// One change under a watched prefix
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub key: String,
    /// The new value (empty for DELETE events)
    pub value: Bytes,
    pub event_type: WatchEventType,
}

impl WatchEvent {
    pub fn put(
        key: impl Into<String>,
        value: Bytes,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            event_type: WatchEventType::Put,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Bytes::new(),
            event_type: WatchEventType::Delete,
        }
    }
}

/// Strongly consistent key/value service holding node registrations and slot
/// assignments. Shared by every proxy, node and the admin side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Bytes>>;

    /// All entries whose key starts with `prefix`, in key order
    async fn get_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Bytes)>>;

    async fn put(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<()>;

    /// Returns whether the key existed
    async fn delete(
        &self,
        key: &str,
    ) -> Result<bool>;

    /// Writes `value` only if the current value equals `expected`
    /// (`None` = key absent). Returns whether the write happened.
    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<Bytes>,
        value: Bytes,
    ) -> Result<bool>;

    /// Subscribes to changes under `prefix`. Events are delivered in commit
    /// order; the receiver yields `None` once the subscription is lost.
    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>>;
}
