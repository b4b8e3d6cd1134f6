use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::protocol::read_response;
use crate::protocol::write_request;
use crate::protocol::BackendCodec;
use crate::protocol::BackendRequest;
use crate::protocol::BackendResponse;
use crate::BackendError;
use crate::NetworkConfig;
use crate::Result;

/// Request/response channel to one cache server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    /// Performs one round trip. Concurrent calls never interleave frames.
    async fn call(
        &self,
        request: BackendRequest,
    ) -> Result<BackendResponse>;

    /// Releases the connection. In-flight and later calls fail with
    /// `ConnectionClosed`.
    fn close(&self);
}

type BackendStream = Framed<TcpStream, BackendCodec>;

/// Live TCP connection to a cache server.
///
/// Round trips are serialized on an async mutex. After an I/O error or a
/// timeout the stream is dropped and the next call dials again, once.
pub struct BackendConnection {
    address: String,
    params: NetworkConfig,
    stream: Mutex<Option<BackendStream>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for BackendConnection {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BackendConnection")
            .field("address", &self.address)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl BackendConnection {
    /// Dials `address` within `params.connect_timeout_in_ms`
    pub async fn connect(
        address: &str,
        params: &NetworkConfig,
    ) -> Result<Self> {
        let stream = Self::dial(address, params).await?;
        debug!(address, "backend connection established");
        Ok(Self {
            address: address.to_string(),
            params: params.clone(),
            stream: Mutex::new(Some(stream)),
            closed: CancellationToken::new(),
        })
    }

    async fn dial(
        address: &str,
        params: &NetworkConfig,
    ) -> Result<BackendStream> {
        let connect_timeout = Duration::from_millis(params.connect_timeout_in_ms);
        let stream = match timeout(connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(BackendError::Connect {
                    address: address.to_string(),
                    source,
                }
                .into())
            }
            Err(_) => return Err(BackendError::Timeout(connect_timeout).into()),
        };
        stream.set_nodelay(params.tcp_nodelay)?;
        Ok(Framed::new(stream, BackendCodec::new(params.max_frame_len)))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn round_trip(
        &self,
        request: &BackendRequest,
    ) -> Result<BackendResponse> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            debug!(address = %self.address, "redialing backend");
            *guard = Some(Self::dial(&self.address, &self.params).await?);
        }
        let Some(framed) = guard.as_mut() else {
            return Err(BackendError::ConnectionClosed.into());
        };

        let request_timeout = Duration::from_millis(self.params.request_timeout_in_ms);
        let result = timeout(request_timeout, async {
            write_request(framed, request).await?;
            read_response(framed).await
        })
        .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!(address = %self.address, "backend round trip failed: {}", e);
                *guard = None;
                Err(e.into())
            }
            Err(_) => {
                warn!(address = %self.address, "backend round trip timed out after {:?}", request_timeout);
                *guard = None;
                Err(BackendError::Timeout(request_timeout).into())
            }
        }
    }
}

#[async_trait]
impl BackendClient for BackendConnection {
    async fn call(
        &self,
        request: BackendRequest,
    ) -> Result<BackendResponse> {
        if self.closed.is_cancelled() {
            return Err(BackendError::ConnectionClosed.into());
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(BackendError::ConnectionClosed.into()),
            result = self.round_trip(&request) => result,
        }
    }

    fn close(&self) {
        self.closed.cancel();
        // An in-flight call holds the lock; its stream goes with the connection.
        if let Ok(mut guard) = self.stream.try_lock() {
            guard.take();
        }
        debug!(address = %self.address, "backend connection closed");
    }
}

/// Opens backend connections. The seam lets callers swap in fakes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(
        &self,
        address: &str,
    ) -> Result<Arc<dyn BackendClient>>;
}

/// Dials real TCP [`BackendConnection`]s
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    params: NetworkConfig,
}

impl TcpDialer {
    pub fn new(params: NetworkConfig) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(
        &self,
        address: &str,
    ) -> Result<Arc<dyn BackendClient>> {
        let conn = BackendConnection::connect(address, &self.params).await?;
        Ok(Arc::new(conn))
    }
}
