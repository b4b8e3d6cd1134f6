use std::collections::HashSet;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Error;
use crate::Result;

/// Cache server registered in metadata when the cluster boots
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InitialNode {
    pub id: u32,
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_initial_nodes")]
    pub initial_nodes: Vec<InitialNode>,

    /// Run every initial node inside the proxy process
    #[serde(default = "default_true")]
    pub embedded_nodes: bool,

    /// Spread all slots across the initial nodes when nothing is assigned yet
    #[serde(default = "default_true")]
    pub assign_slots_on_boot: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            initial_nodes: default_initial_nodes(),
            embedded_nodes: true,
            assign_slots_on_boot: true,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut addresses = HashSet::new();
        for node in &self.initial_nodes {
            if node.id == 0 {
                return Err(Error::Config(ConfigError::Message(
                    "cluster.initial_nodes: node id cannot be 0".into(),
                )));
            }
            if !ids.insert(node.id) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "Duplicate node id {} in initial_nodes",
                    node.id
                ))));
            }
            if !addresses.insert(node.address.as_str()) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "Duplicate address {} in initial_nodes",
                    node.address
                ))));
            }
        }

        if self.assign_slots_on_boot && self.initial_nodes.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "assign_slots_on_boot requires at least one initial node".into(),
            )));
        }

        validate_directory(&self.log_dir, "log_dir")
    }
}

fn default_true() -> bool {
    true
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/slotcache/logs")
}
fn default_initial_nodes() -> Vec<InitialNode> {
    vec![
        InitialNode {
            id: 1,
            address: "127.0.0.1:7001".to_string(),
        },
        InitialNode {
            id: 2,
            address: "127.0.0.1:7002".to_string(),
        },
    ]
}
