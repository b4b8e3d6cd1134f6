//! Administrative side of the cluster: node registration, slot assignment and
//! online slot migration. Everything here works through the metadata store;
//! proxies pick the changes up on their next request or watch event.

mod cluster;
mod migration;

pub use cluster::*;
pub use migration::*;
