//! Configuration management for proxies and cache server nodes.
//!
//! Sources are merged with increasing priority:
//! 1. Default values (hardcoded)
//! 2. File named by `CONFIG_PATH`
//! 3. Environment variables `SLOTCACHE__<SECTION>__<KEY>`
//!
//! Overrides applied afterwards through [`CacheConfig::with_override_config`]
//! follow the same rule. Validation is explicit and deferred to
//! [`CacheConfig::validate`].

mod cluster;
mod network;
mod node;
mod proxy;
mod retry;
pub use cluster::*;
pub use network::*;
pub use node::*;
pub use proxy::*;
pub use retry::*;


//---
use std::env;
use std::path::Path;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

const ENV_PREFIX: &str = "SLOTCACHE";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CacheConfig {
    /// Client-facing RESP listener
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Local cache server node
    #[serde(default)]
    pub node: NodeConfig,
    /// Backend connection parameters
    #[serde(default)]
    pub network: NetworkConfig,
    /// Retry policies for dialing and watching
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Cluster bootstrap and logging
    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl CacheConfig {
    /// Loads defaults, then `CONFIG_PATH`, then environment variables.
    ///
    /// # Note
    /// The result is not validated. Call [`CacheConfig::validate`] after all
    /// overrides are applied.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies another configuration file on top of the current values.
    /// Environment variables still win.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance
    pub fn validate(self) -> Result<Self> {
        self.proxy.validate()?;
        self.node.validate()?;
        self.network.validate()?;
        self.retry.validate()?;
        self.cluster.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

/// Ensures a directory path is usable
pub(super) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::Config(ConfigError::Message(format!(
            "{name} path cannot be empty"
        ))));
    }

    #[cfg(not(test))]
    {
        use std::fs;
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| {
                Error::Config(ConfigError::Message(format!(
                    "Failed to create {name} directory at {}: {e}",
                    path.display()
                )))
            })?;
        }
    }

    Ok(())
}
