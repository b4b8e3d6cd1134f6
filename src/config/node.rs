use std::net::SocketAddr;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Error;
use crate::Result;

/// Storage engine backing a cache server node
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub node_id: u32,

    /// Address the backend listener binds to
    #[serde(default = "default_node_addr")]
    pub listen_address: SocketAddr,

    /// Parent directory of per-node sled databases
    #[serde(default = "default_db_dir")]
    pub db_root_dir: PathBuf,

    #[serde(default)]
    pub engine: EngineKind,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            listen_address: default_node_addr(),
            db_root_dir: default_db_dir(),
            engine: EngineKind::default(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.node_id == 0 {
            return Err(Error::Config(ConfigError::Message(
                "node.node_id cannot be 0".into(),
            )));
        }

        if self.listen_address.port() == 0 {
            return Err(Error::Config(ConfigError::Message(
                "node.listen_address must specify a non-zero port".into(),
            )));
        }

        if self.engine == EngineKind::Sled {
            validate_directory(&self.db_root_dir, "db_root_dir")?;
        }

        Ok(())
    }

    /// Database directory of the node with the given id
    pub fn db_path(
        &self,
        node_id: u32,
    ) -> PathBuf {
        self.db_root_dir.join(format!("node{node_id}"))
    }
}

fn default_node_id() -> u32 {
    1
}
fn default_node_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7001))
}
fn default_db_dir() -> PathBuf {
    PathBuf::from("/tmp/slotcache/db")
}
