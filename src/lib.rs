//! A slot-sharded key-value cache.
//!
//! Clients speak RESP to a stateless [`proxy`]. Every key hashes to one of
//! [`constants::SLOT_COUNT`] slots; the [`router`] looks the slot up in the
//! shared [`metadata`] store and forwards the command over the binary
//! [`protocol`] to the owning cache server ([`node`]). The [`watcher`] keeps
//! the proxy's backend connections in line with node registrations, and the
//! [`admin`] side assigns slots and migrates them between nodes online.

pub mod admin;
pub mod constants;
pub mod metadata;
pub mod network;
pub mod node;
pub mod protocol;
pub mod proxy;
pub mod router;
pub mod utils;
pub mod watcher;

mod config;
mod errors;
mod storage;

pub use config::*;
pub use errors::*;
pub use storage::*;
