//! Assembles a complete cluster inside one process.
//!
//! The [`StandaloneBuilder`] seeds the metadata store with the configured
//! initial nodes, optionally runs those nodes in-process, spreads the slot
//! space across them, and starts the proxy side (metadata watcher, migration
//! worker, RESP listener).
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let cluster = StandaloneBuilder::new(config, shutdown_rx).start().await?;
//! println!("proxy on {}", cluster.proxy_addr());
//! cluster.wait().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;

use super::CacheServer;
use crate::admin::ClusterAdmin;
use crate::admin::Migrator;
use crate::metadata::MemoryMetadataStore;
use crate::metadata::MetadataStore;
use crate::network::ConnectionRegistry;
use crate::network::Dialer;
use crate::network::TcpDialer;
use crate::proxy::ProxyServer;
use crate::router::RequestRouter;
use crate::watcher::MetadataWatcher;
use crate::CacheConfig;
use crate::EngineKind;
use crate::Error;
use crate::MemoryStorageEngine;
use crate::NodeConfig;
use crate::Result;
use crate::SledStorageEngine;
use crate::StorageEngine;

/// Opens the storage engine `node` selects for the node with `node_id`
pub fn open_storage_engine(
    node: &NodeConfig,
    node_id: u32,
) -> Result<Arc<dyn StorageEngine>> {
    match node.engine {
        EngineKind::Sled => Ok(Arc::new(SledStorageEngine::open(node.db_path(node_id))?)),
        EngineKind::Memory => Ok(Arc::new(MemoryStorageEngine::new())),
    }
}

fn parse_address(address: &str) -> Result<SocketAddr> {
    address
        .parse()
        .map_err(|e| Error::Fatal(format!("invalid node address '{address}': {e}")))
}

pub struct StandaloneBuilder {
    config: CacheConfig,
    shutdown: watch::Receiver<()>,
    store: Option<Arc<dyn MetadataStore>>,
}

impl StandaloneBuilder {
    pub fn new(
        config: CacheConfig,
        shutdown: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            shutdown,
            store: None,
        }
    }

    /// Uses an existing metadata store instead of a fresh in-memory one
    pub fn metadata_store(
        mut self,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    /// Starts every component. Returns once the proxy is accepting clients.
    pub async fn start(self) -> Result<Standalone> {
        let Self {
            config,
            shutdown,
            store,
        } = self;
        let store: Arc<dyn MetadataStore> = match store {
            Some(store) => store,
            None => Arc::new(MemoryMetadataStore::new()),
        };
        let admin = ClusterAdmin::new(store.clone());
        let mut tasks = Vec::new();

        let mut owners = Vec::with_capacity(config.cluster.initial_nodes.len());
        for initial in &config.cluster.initial_nodes {
            let address = if config.cluster.embedded_nodes {
                let engine = open_storage_engine(&config.node, initial.id)?;
                let server =
                    CacheServer::bind(parse_address(&initial.address)?, engine, config.network.max_frame_len).await?;
                let bound = server.local_addr()?.to_string();
                tasks.push(tokio::spawn(server.serve(shutdown.clone())));
                bound
            } else {
                initial.address.clone()
            };
            admin.register_node(initial.id, address.clone()).await?;
            owners.push(address);
        }

        if config.cluster.assign_slots_on_boot {
            if admin.list_slots().await?.is_empty() {
                admin.assign_evenly(&owners).await?;
            } else {
                info!("Slots already assigned, keeping existing layout");
            }
        }

        let registry = Arc::new(ConnectionRegistry::new());
        let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::new(config.network.clone()));
        let watcher = MetadataWatcher::new(store.clone(), registry.clone(), dialer.clone(), config.retry.clone())
            .start(shutdown.clone())
            .await?;

        let migrator = Arc::new(Migrator::new(store.clone(), dialer));
        let migration_worker = migrator.spawn(shutdown.clone());

        let router = RequestRouter::new(store.clone(), registry.clone());
        let proxy = ProxyServer::bind(config.proxy.listen_address, router).await?;
        let proxy_addr = proxy.local_addr()?;
        tasks.push(tokio::spawn(proxy.serve(shutdown)));

        info!(%proxy_addr, nodes = owners.len(), "standalone cluster started");
        Ok(Standalone {
            proxy_addr,
            node_addrs: owners,
            store,
            registry,
            migrator,
            tasks,
            watcher,
            migration_worker,
        })
    }
}

/// Handles to a running standalone cluster
pub struct Standalone {
    proxy_addr: SocketAddr,
    node_addrs: Vec<String>,
    store: Arc<dyn MetadataStore>,
    registry: Arc<ConnectionRegistry>,
    migrator: Arc<Migrator>,
    tasks: Vec<JoinHandle<Result<()>>>,
    watcher: JoinHandle<()>,
    migration_worker: JoinHandle<()>,
}

impl Standalone {
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    /// Registered cache server addresses, in configuration order
    pub fn node_addrs(&self) -> &[String] {
        &self.node_addrs
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn admin(&self) -> ClusterAdmin {
        ClusterAdmin::new(self.store.clone())
    }

    pub fn migrator(&self) -> Arc<Migrator> {
        self.migrator.clone()
    }

    /// Waits for every listener and background task to stop
    pub async fn wait(self) -> Result<()> {
        for task in self.tasks {
            if let Err(e) = task.await? {
                error!("listener stopped with error: {:?}", e);
            }
        }
        self.watcher.await?;
        self.migration_worker.await?;
        self.registry.clear();
        info!("standalone cluster stopped");
        Ok(())
    }
}
