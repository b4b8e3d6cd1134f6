#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use parking_lot::Mutex;
use slotcache::admin::ClusterAdmin;
use slotcache::metadata::MemoryMetadataStore;
use slotcache::metadata::MetadataStore;
use slotcache::network::ConnectionRegistry;
use slotcache::network::Dialer;
use slotcache::network::TcpDialer;
use slotcache::node::execute;
use slotcache::protocol::BackendCodec;
use slotcache::protocol::BackendFrame;
use slotcache::protocol::BackendRequest;
use slotcache::protocol::BackendResponse;
use slotcache::protocol::Command;
use slotcache::protocol::Reply;
use slotcache::protocol::RespClientCodec;
use slotcache::proxy::ProxyServer;
use slotcache::router::RequestRouter;
use slotcache::watcher::MetadataWatcher;
use slotcache::MemoryStorageEngine;
use slotcache::NetworkConfig;
use slotcache::RetryPolicies;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache server that answers from a memory engine and keeps every frame it
/// received
pub struct RecordingNode {
    pub address: String,
    pub engine: Arc<MemoryStorageEngine>,
    frames: Arc<Mutex<Vec<BackendFrame>>>,
}

impl RecordingNode {
    pub async fn spawn(shutdown: watch::Receiver<()>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let engine = Arc::new(MemoryStorageEngine::new());
        let frames = Arc::new(Mutex::new(Vec::new()));

        let node_engine = engine.clone();
        let node_frames = frames.clone();
        let mut shutdown = shutdown;
        tokio::spawn(async move {
            loop {
                let socket = tokio::select! {
                    _ = shutdown.changed() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, _)) => socket,
                        Err(_) => return,
                    },
                };
                let engine = node_engine.clone();
                let frames = node_frames.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, BackendCodec::default());
                    while let Some(Ok(frame)) = framed.next().await {
                        frames.lock().push(frame.clone());
                        let response = match BackendRequest::from_frame(&frame) {
                            Ok(request) => execute(engine.as_ref(), request),
                            Err(e) => BackendResponse::info(e.to_string()),
                        };
                        if framed.send(response.to_frame().unwrap()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            address,
            engine,
            frames,
        }
    }

    /// Requests received so far, decoded
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| BackendRequest::from_frame(frame).ok())
            .collect()
    }

    pub fn frames(&self) -> Vec<BackendFrame> {
        self.frames.lock().clone()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

/// Proxy, metadata store and recording nodes wired together over TCP
pub struct TestCluster {
    pub proxy_addr: String,
    pub store: Arc<MemoryMetadataStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub nodes: Vec<RecordingNode>,
    pub shutdown: watch::Sender<()>,
}

impl TestCluster {
    /// Registers `node_count` nodes, none of them owning any slot yet
    pub async fn start(node_count: usize) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(());
        let store = Arc::new(MemoryMetadataStore::new());
        let admin = ClusterAdmin::new(store.clone());

        let mut nodes = Vec::with_capacity(node_count);
        for id in 0..node_count {
            let node = RecordingNode::spawn(shutdown_rx.clone()).await;
            admin.register_node(id as u32 + 1, node.address.clone()).await.unwrap();
            nodes.push(node);
        }

        let registry = Arc::new(ConnectionRegistry::new());
        let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::new(NetworkConfig::default()));
        MetadataWatcher::new(store.clone(), registry.clone(), dialer, RetryPolicies::default())
            .start(shutdown_rx.clone())
            .await
            .unwrap();

        let router = RequestRouter::new(store.clone(), registry.clone());
        let proxy = ProxyServer::bind("127.0.0.1:0".parse().unwrap(), router).await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap().to_string();
        tokio::spawn(proxy.serve(shutdown_rx));

        Self {
            proxy_addr,
            store,
            registry,
            nodes,
            shutdown,
        }
    }

    pub fn admin(&self) -> ClusterAdmin {
        ClusterAdmin::new(self.store.clone())
    }

    pub async fn put_slot(
        &self,
        slot: slotcache::metadata::Slot,
    ) {
        self.store.put(&slot.key(), slot.encode().unwrap()).await.unwrap();
    }

    pub async fn client(&self) -> RespClient {
        RespClient::connect(&self.proxy_addr).await
    }
}

pub struct RespClient {
    framed: Framed<TcpStream, RespClientCodec>,
}

impl RespClient {
    pub async fn connect(address: &str) -> Self {
        let socket = TcpStream::connect(address).await.unwrap();
        Self {
            framed: Framed::new(socket, RespClientCodec),
        }
    }

    pub async fn send(
        &mut self,
        parts: &[&str],
    ) -> Reply {
        let args = parts[1..].iter().map(|arg| Bytes::copy_from_slice(arg.as_bytes())).collect();
        self.framed.send(Command::new(parts[0], args)).await.unwrap();
        tokio::time::timeout(WAIT_TIMEOUT, self.framed.next())
            .await
            .expect("no reply from proxy")
            .expect("proxy closed the connection")
            .unwrap()
    }
}

pub fn bulk(value: &str) -> Reply {
    Reply::Bulk(Bytes::copy_from_slice(value.as_bytes()))
}
