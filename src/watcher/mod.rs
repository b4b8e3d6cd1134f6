//! Keeps the connection registry in line with the cache servers registered
//! under `/cacheserver/`.

mod metadata_watcher;

pub use metadata_watcher::*;
