//! Cluster metadata: node registrations under `/cacheserver/<id>` and slot
//! assignments under `/slot/<id>`, both stored as JSON records.

mod memory;
mod store;
mod types;

pub use memory::*;
pub use store::*;
pub use types::*;
