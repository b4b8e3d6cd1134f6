use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::MetadataStore;
use super::WatchEvent;
use crate::Result;

struct Subscriber {
    prefix: String,
    sender: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Bytes>,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    /// Fans an event out while the data lock is held, so subscribers observe
    /// changes in commit order.
    fn notify(
        &mut self,
        event: WatchEvent,
    ) {
        self.subscribers.retain(|sub| {
            if !event.key.starts_with(&sub.prefix) {
                return !sub.sender.is_closed();
            }
            sub.sender.send(event.clone()).is_ok()
        });
    }
}

/// In-process metadata store.
///
/// Used by the standalone deployment and by tests. Every operation is applied
/// under one lock, which gives the linearizable view routing relies on.
#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every active subscription; receivers observe end of stream.
    pub fn close_watches(&self) {
        self.inner.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.iter().filter(|s| !s.sender.is_closed()).count()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Bytes>> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    async fn get_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Bytes)>> {
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<()> {
        trace!(key, "metadata put");
        let mut inner = self.inner.lock();
        inner.entries.insert(key.to_string(), value.clone());
        inner.notify(WatchEvent::put(key, value));
        Ok(())
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<bool> {
        trace!(key, "metadata delete");
        let mut inner = self.inner.lock();
        let existed = inner.entries.remove(key).is_some();
        if existed {
            inner.notify(WatchEvent::delete(key));
        }
        Ok(existed)
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<Bytes>,
        value: Bytes,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.entries.get(key) != expected.as_ref() {
            return Ok(false);
        }
        inner.entries.insert(key.to_string(), value.clone());
        inner.notify(WatchEvent::put(key, value));
        Ok(true)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(Subscriber {
            prefix: prefix.to_string(),
            sender,
        });
        Ok(receiver)
    }
}
