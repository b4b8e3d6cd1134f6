pub mod backoff;
pub mod logging;
pub mod time;
