//! Key/value storage behind a cache server node.

mod adaptors;
mod storage_engine;

pub use adaptors::*;
pub use storage_engine::*;
