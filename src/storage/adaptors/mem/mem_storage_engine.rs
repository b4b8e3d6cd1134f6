use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use crate::router::slot_for_key;
use crate::Result;
use crate::StorageEngine;

/// In-memory storage engine, keyed by `(slot, key)`
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    data: RwLock<BTreeMap<(u32, String), Bytes>>,
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn entry_key(key: &str) -> (u32, String) {
    (slot_for_key(key.as_bytes()), key.to_string())
}

impl StorageEngine for MemoryStorageEngine {
    fn read(
        &self,
        key: &str,
    ) -> Result<Option<Bytes>> {
        Ok(self.data.read().get(&entry_key(key)).cloned())
    }

    fn write(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<()> {
        trace!(key, len = value.len(), "write");
        self.data.write().insert(entry_key(key), value);
        Ok(())
    }

    fn write_if_absent(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<bool> {
        let mut data = self.data.write();
        let entry_key = entry_key(key);
        if data.contains_key(&entry_key) {
            return Ok(false);
        }
        data.insert(entry_key, value);
        Ok(true)
    }

    fn delete(
        &self,
        key: &str,
    ) -> Result<bool> {
        Ok(self.data.write().remove(&entry_key(key)).is_some())
    }

    fn keys_in_slot(
        &self,
        slot: u32,
    ) -> Result<Vec<String>> {
        let data = self.data.read();
        Ok(data
            .range((slot, String::new())..)
            .take_while(|((s, _), _)| *s == slot)
            .map(|((_, k), _)| k.clone())
            .collect())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }
}
