//! Outbound connections from the proxy to cache server nodes.

mod connection;
mod registry;

pub use connection::*;
pub use registry::*;

#[cfg(test)]
mod connection_test;
