//! Cache server nodes and the single-process cluster bootstrap.

mod builder;
mod server;

pub use builder::*;
pub use server::*;

#[cfg(test)]
mod server_test;
