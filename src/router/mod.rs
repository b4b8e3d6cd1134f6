//! Key to slot to node resolution and command dispatch.

mod dispatch;
mod slot;

pub use dispatch::*;
pub use slot::*;
