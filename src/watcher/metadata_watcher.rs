use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::CACHE_SERVER_PREFIX;
use crate::metadata::CacheServerNode;
use crate::metadata::MetadataStore;
use crate::metadata::WatchEvent;
use crate::metadata::WatchEventType;
use crate::network::BackendClient;
use crate::network::ConnectionRegistry;
use crate::network::Dialer;
use crate::utils::backoff::task_with_timeout_and_exponential_backoff;
use crate::Result;
use crate::RetryPolicies;

type Snapshot = (mpsc::UnboundedReceiver<WatchEvent>, Vec<(String, CacheServerNode)>);

/// Mirrors cache server registrations into the [`ConnectionRegistry`].
///
/// The watcher is the only writer of the registry. It remembers which address
/// each `/cacheserver/<id>` key announced, so a DELETE (which carries no
/// value) can still be mapped to the connection it has to drop.
pub struct MetadataWatcher {
    store: Arc<dyn MetadataStore>,
    registry: Arc<ConnectionRegistry>,
    dialer: Arc<dyn Dialer>,
    retry: RetryPolicies,
    known: HashMap<String, String>,
}

impl MetadataWatcher {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<ConnectionRegistry>,
        dialer: Arc<dyn Dialer>,
        retry: RetryPolicies,
    ) -> Self {
        Self {
            store,
            registry,
            dialer,
            retry,
            known: HashMap::new(),
        }
    }

    /// Subscribes, connects to every registered node, then hands the event
    /// loop to a background task.
    ///
    /// The subscription is taken before the enumeration so no registration
    /// can fall between the two. Metadata failures here are returned; nodes
    /// that cannot be dialed are only logged.
    pub async fn start(
        mut self,
        shutdown: watch::Receiver<()>,
    ) -> Result<JoinHandle<()>> {
        let (events, nodes) = subscribe(self.store.clone()).await?;
        self.sync(nodes).await;
        info!(
            connections = self.registry.len(),
            "Metadata watcher synchronized with registered cache servers"
        );
        Ok(tokio::spawn(self.run(events, shutdown)))
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
        mut shutdown: watch::Receiver<()>,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => event,
            };

            match event {
                Some(event) => {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = self.handle_event(event) => {}
                    }
                }
                None => {
                    error!("Metadata watch stream on {} closed, resubscribing", CACHE_SERVER_PREFIX);
                    let policy = self.retry.watch;
                    let store = self.store.clone();
                    let resubscribed = tokio::select! {
                        _ = shutdown.changed() => break,
                        r = task_with_timeout_and_exponential_backoff(|| subscribe(store.clone()), policy) => r,
                    };
                    match resubscribed {
                        Ok((fresh, nodes)) => {
                            events = fresh;
                            self.sync(nodes).await;
                            info!("Metadata watch re-established");
                        }
                        Err(e) => {
                            error!("Giving up on metadata watch: {}", e);
                            break;
                        }
                    }
                }
            }
        }
        info!("Metadata watcher stopped");
    }

    async fn handle_event(
        &mut self,
        event: WatchEvent,
    ) {
        match event.event_type {
            WatchEventType::Put => match CacheServerNode::decode(&event.key, &event.value) {
                Ok(node) => self.apply(event.key, node).await,
                Err(e) => warn!("Ignoring cache server registration: {}", e),
            },
            WatchEventType::Delete => self.forget(&event.key),
        }
    }

    /// Applies a full listing. Keys missing from it are treated as deleted.
    async fn sync(
        &mut self,
        nodes: Vec<(String, CacheServerNode)>,
    ) {
        let listed: HashSet<String> = nodes.iter().map(|(key, _)| key.clone()).collect();
        let stale: Vec<String> = self.known.keys().filter(|key| !listed.contains(*key)).cloned().collect();
        for key in stale {
            self.forget(&key);
        }

        for (key, node) in nodes {
            self.apply(key, node).await;
        }
    }

    async fn apply(
        &mut self,
        key: String,
        node: CacheServerNode,
    ) {
        let previous = self.known.get(&key).cloned();

        if !node.state.is_serving() {
            info!(node_id = node.id, address = %node.address, "cache server offline");
            self.known.remove(&key);
            self.registry.remove(&node.address);
            if let Some(old) = previous.filter(|old| *old != node.address) {
                self.registry.remove(&old);
            }
            return;
        }

        if previous.as_deref() == Some(node.address.as_str()) && self.registry.contains(&node.address) {
            debug!(node_id = node.id, address = %node.address, "cache server already connected");
            return;
        }

        match self.dial(&node.address).await {
            Ok(client) => {
                info!(node_id = node.id, address = %node.address, "connected to cache server");
                self.registry.add(node.address.clone(), client);
            }
            Err(e) => {
                warn!(node_id = node.id, address = %node.address, "unable to reach cache server: {}", e);
            }
        }

        if let Some(old) = previous.filter(|old| *old != node.address) {
            info!(node_id = node.id, old = %old, new = %node.address, "cache server moved");
            self.registry.remove(&old);
        }
        self.known.insert(key, node.address);
    }

    fn forget(
        &mut self,
        key: &str,
    ) {
        match self.known.remove(key) {
            Some(address) => {
                info!(key, %address, "cache server deregistered");
                self.registry.remove(&address);
            }
            None => debug!(key, "deregistration of unknown cache server"),
        }
    }

    async fn dial(
        &self,
        address: &str,
    ) -> Result<Arc<dyn BackendClient>> {
        let dialer = self.dialer.clone();
        task_with_timeout_and_exponential_backoff(
            || {
                let dialer = dialer.clone();
                let address = address.to_string();
                async move { dialer.dial(&address).await }
            },
            self.retry.dial,
        )
        .await
    }
}

async fn subscribe(store: Arc<dyn MetadataStore>) -> Result<Snapshot> {
    let events = store.watch_prefix(CACHE_SERVER_PREFIX).await?;
    let nodes = CacheServerNode::list(store.as_ref()).await?;
    Ok((events, nodes))
}
