use bytes::Bytes;

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Local key/value store of one cache server node.
///
/// Keys are grouped by slot so a migration can enumerate everything a slot
/// holds without a full scan.
#[cfg_attr(test, automock)]
pub trait StorageEngine: Send + Sync + 'static {
    fn read(
        &self,
        key: &str,
    ) -> Result<Option<Bytes>>;

    fn write(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<()>;

    /// Stores `value` only when `key` is absent. Returns whether it was stored.
    fn write_if_absent(
        &self,
        key: &str,
        value: Bytes,
    ) -> Result<bool>;

    /// Returns whether the key existed
    fn delete(
        &self,
        key: &str,
    ) -> Result<bool>;

    /// All keys hashing to `slot`
    fn keys_in_slot(
        &self,
        slot: u32,
    ) -> Result<Vec<String>>;

    fn flush(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
