use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::Error;
use crate::Result;

/// Parameters of outbound connections from a proxy to cache server nodes
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Deadline of one request/response round trip in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// Largest backend frame payload accepted or sent, in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            max_frame_len: default_max_frame_len(),
            tcp_nodelay: default_tcp_nodelay(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "network.connect_timeout_in_ms must be > 0".into(),
            )));
        }

        if self.request_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "network.request_timeout_in_ms must be > 0".into(),
            )));
        }

        if self.max_frame_len < 1024 {
            return Err(Error::Config(ConfigError::Message(format!(
                "network.max_frame_len {} too small, minimum 1024 bytes",
                self.max_frame_len
            ))));
        }

        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    500
}
fn default_request_timeout() -> u64 {
    3000
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_tcp_nodelay() -> bool {
    true
}
