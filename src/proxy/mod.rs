//! Client-facing RESP listener.

mod server;

pub use server::*;
