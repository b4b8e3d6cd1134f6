use std::net::SocketAddr;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::protocol::Reply;
use crate::protocol::RespCodec;
use crate::router::RequestRouter;
use crate::Error;
use crate::Result;

/// Accept loop of the proxy. Each client connection runs on its own task and
/// its commands are answered strictly in order.
pub struct ProxyServer {
    listener: TcpListener,
    router: RequestRouter,
}

impl ProxyServer {
    /// Binds the listener. Failing here means the proxy never started.
    pub async fn bind(
        addr: SocketAddr,
        router: RequestRouter,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Fatal(format!("failed to bind proxy listener on {addr}: {e}")))?;
        info!("Proxy listening on {}", listener.local_addr()?);
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves clients until `shutdown` fires
    pub async fn serve(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Proxy shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "client connected");
                        let router = self.router.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_client(socket, peer, router, shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept client connection: {}", e);
                    }
                },
            }
        }
        Ok(())
    }
}

async fn handle_client(
    socket: TcpStream,
    peer: SocketAddr,
    router: RequestRouter,
    mut shutdown: watch::Receiver<()>,
) {
    if let Err(e) = socket.set_nodelay(true) {
        debug!(%peer, "set_nodelay failed: {}", e);
    }
    let mut framed = Framed::new(socket, RespCodec::new());

    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = framed.next() => next,
        };

        match next {
            Some(Ok(command)) => {
                debug!(%peer, command = %command.name, "request");
                let reply = router.dispatch(command).await;
                if let Err(e) = framed.send(reply).await {
                    debug!(%peer, "failed to write reply: {}", e);
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(%peer, "closing client connection: {}", e);
                // best effort, the stream may already be gone
                let _ = framed.send(Reply::error(format!("ERR {e}"))).await;
                break;
            }
            None => {
                debug!(%peer, "client disconnected");
                break;
            }
        }
    }
}
