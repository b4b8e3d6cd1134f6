//! Wire formats: RESP towards clients, length-prefixed JSON frames towards
//! cache server nodes.

mod backend;
mod resp;

pub use backend::*;
pub use resp::*;

#[cfg(test)]
mod backend_test;
#[cfg(test)]
mod resp_test;
