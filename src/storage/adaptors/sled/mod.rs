mod sled_storage_engine;

pub use sled_storage_engine::*;


use std::path::Path;

use crate::Error;

/// Tree holding cache entries
pub(crate) const CACHE_TREE: &str = "slotcache_kv";

#[doc(hidden)]
pub fn init_sled_storage_engine_db(
    sled_db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> Result<sled::Db, Error> {
    tracing::debug!(
        "init_sled_storage_engine_db from path: {:?}",
        &sled_db_root_path
    );

    let path = sled_db_root_path.as_ref();
    let db_path = path.join("storage_engine");

    sled::Config::default()
        .path(&db_path)
        .cache_capacity(256 * 1024 * 1024) //256MB
        .flush_every_ms(Some(10))
        .use_compression(true)
        .compression_factor(1)
        .mode(sled::Mode::HighThroughput)
        .open()
        .map_err(|e| {
            tracing::warn!(
                "Try to open DB at this location: {:?} and failed: {:?}",
                db_path,
                e
            );
            e.into()
        })
}
