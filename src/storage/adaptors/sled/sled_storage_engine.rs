use std::path::Path;

use bytes::Bytes;
use sled::CompareAndSwapError;
use tracing::debug;
use tracing::instrument;
use tracing::trace;

use super::init_sled_storage_engine_db;
use super::CACHE_TREE;
use crate::router::slot_for_key;
use crate::Result;
use crate::StorageEngine;
use crate::StorageError;

/// Persistent storage engine on a sled tree.
///
/// Entries are stored under `slot (u32 BE) ++ key` so that the keys of one
/// slot form a contiguous prefix range.
pub struct SledStorageEngine {
    tree: sled::Tree,
}

impl SledStorageEngine {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// Opens (or creates) the database under `path`
    pub fn open(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let db = init_sled_storage_engine_db(&path)?;
        let tree = db.open_tree(CACHE_TREE)?;
        debug!(?path, entries = tree.len(), "sled storage engine opened");
        Ok(Self::new(tree))
    }

    fn entry_key(key: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + key.len());
        buf.extend_from_slice(&slot_for_key(key.as_bytes()).to_be_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf
    }
}

impl StorageEngine for SledStorageEngine {
    fn read(
        &self,
        key: &str,
    ) -> Result<Option<Bytes>> {
        Ok(self
            .tree
            .get(Self::entry_key(key))?
            .map(|v| Bytes::copy_from_slice(&v)))
    }

    fn write(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<()> {
        trace!(key, len = value.len(), "write");
        self.tree.insert(Self::entry_key(key), &value[..])?;
        Ok(())
    }

    fn write_if_absent(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<bool> {
        match self
            .tree
            .compare_and_swap(Self::entry_key(key), None::<&[u8]>, Some(&value[..]))?
        {
            Ok(()) => Ok(true),
            Err(CompareAndSwapError { .. }) => Ok(false),
        }
    }

    fn delete(
        &self,
        key: &str,
    ) -> Result<bool> {
        Ok(self.tree.remove(Self::entry_key(key))?.is_some())
    }

    #[instrument(skip(self))]
    fn keys_in_slot(
        &self,
        slot: u32,
    ) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.tree.scan_prefix(slot.to_be_bytes()) {
            let (k, _) = item?;
            let key = std::str::from_utf8(&k[4..])
                .map_err(|e| StorageError::DbError(format!("non UTF-8 key in slot {slot}: {e}")))?;
            keys.push(key.to_string());
        }
        Ok(keys)
    }

    fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}
