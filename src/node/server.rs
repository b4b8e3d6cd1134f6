use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::WRITE_NX_EXISTS;
use crate::constants::WRITE_NX_STORED;
use crate::protocol::read_request;
use crate::protocol::write_response;
use crate::protocol::BackendCodec;
use crate::protocol::BackendRequest;
use crate::protocol::BackendResponse;
use crate::Error;
use crate::Result;
use crate::StorageEngine;

/// Backend listener of one cache server node
pub struct CacheServer {
    listener: TcpListener,
    engine: Arc<dyn StorageEngine>,
    max_frame_len: usize,
}

impl CacheServer {
    pub async fn bind(
        addr: SocketAddr,
        engine: Arc<dyn StorageEngine>,
        max_frame_len: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Fatal(format!("failed to bind cache server on {addr}: {e}")))?;
        info!("Cache server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            engine,
            max_frame_len,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Cache server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "proxy connected");
                        let engine = self.engine.clone();
                        let codec = BackendCodec::new(self.max_frame_len);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, peer, codec, engine, shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept backend connection: {}", e);
                    }
                },
            }
        }

        if let Err(e) = self.engine.flush() {
            error!("Failed to flush storage engine: {}", e);
        }
        Ok(())
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    codec: BackendCodec,
    engine: Arc<dyn StorageEngine>,
    mut shutdown: watch::Receiver<()>,
) {
    let mut framed = Framed::new(socket, codec);

    loop {
        let incoming = tokio::select! {
            _ = shutdown.changed() => break,
            incoming = read_request(&mut framed) => incoming,
        };

        let response = match incoming {
            Ok(Some(Ok(request))) => execute(engine.as_ref(), request),
            // frame boundaries are intact, keep serving
            Ok(Some(Err(e))) => {
                warn!(%peer, "malformed request: {}", e);
                BackendResponse::info(e.to_string())
            }
            Ok(None) => {
                debug!(%peer, "proxy disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer, "closing backend connection: {}", e);
                break;
            }
        };

        if let Err(e) = write_response(&mut framed, &response).await {
            warn!(%peer, "failed to write response: {}", e);
            break;
        }
    }
}

/// Applies one request to the engine. Engine failures become INFO responses.
pub fn execute(
    engine: &dyn StorageEngine,
    request: BackendRequest,
) -> BackendResponse {
    let result = match request {
        BackendRequest::Read { key } => engine.read(&key).map(|value| match value {
            Some(value) => BackendResponse::ok(String::from_utf8_lossy(&value)),
            None => BackendResponse::not_found(),
        }),
        BackendRequest::Write { key, value } => engine
            .write(&key, Bytes::from(value))
            .map(|_| BackendResponse::ok("OK")),
        BackendRequest::Delete { key } => engine.delete(&key).map(|_| BackendResponse::ok("OK")),
        BackendRequest::Scan { slot } => engine.keys_in_slot(slot).and_then(|keys| {
            let listing = serde_json::to_string(&keys)?;
            Ok(BackendResponse::ok(listing))
        }),
        BackendRequest::WriteNx { key, value } => engine
            .write_if_absent(&key, Bytes::from(value))
            .map(|stored| BackendResponse::ok(if stored { WRITE_NX_STORED } else { WRITE_NX_EXISTS })),
    };

    result.unwrap_or_else(|e| {
        error!("storage engine failure: {}", e);
        BackendResponse::info(e.to_string())
    })
}
