use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use super::*;
use crate::protocol::BackendCodec;
use crate::protocol::BackendRequest;
use crate::protocol::BackendResponse;
use crate::BackendError;
use crate::Error;
use crate::NetworkConfig;

fn test_params() -> NetworkConfig {
    NetworkConfig {
        connect_timeout_in_ms: 200,
        request_timeout_in_ms: 200,
        ..Default::default()
    }
}

/// Echo-style backend: answers every READ with the key as value, and closes
/// the connection after `answer_limit` requests.
async fn spawn_backend(answer_limit: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut framed = Framed::new(socket, BackendCodec::default());
                for _ in 0..answer_limit {
                    let Some(Ok(frame)) = framed.next().await else {
                        return;
                    };
                    let response = match BackendRequest::from_frame(&frame) {
                        Ok(BackendRequest::Read { key }) => BackendResponse::ok(key),
                        _ => BackendResponse::info("unsupported"),
                    };
                    framed.send(response.to_frame().unwrap()).await.unwrap();
                }
            });
        }
    });
    address
}

#[tokio::test]
async fn test_call_round_trip() {
    let address = spawn_backend(usize::MAX).await;
    let conn = BackendConnection::connect(&address, &test_params()).await.unwrap();

    let response = conn.call(BackendRequest::Read { key: "foo".into() }).await.unwrap();
    assert!(response.is_ok());
    assert_eq!(response.msg, "foo");
    assert_eq!(conn.address(), address);
}

#[tokio::test]
async fn test_concurrent_calls_do_not_interleave() {
    let address = spawn_backend(usize::MAX).await;
    let conn = std::sync::Arc::new(BackendConnection::connect(&address, &test_params()).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..20 {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("key-{i}");
            let response = conn.call(BackendRequest::Read { key: key.clone() }).await.unwrap();
            assert_eq!(response.msg, key);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = BackendConnection::connect(&address, &test_params()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Backend(BackendError::Connect { .. }) | Error::Backend(BackendError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_closed_connection_rejects_calls() {
    let address = spawn_backend(usize::MAX).await;
    let conn = BackendConnection::connect(&address, &test_params()).await.unwrap();

    conn.close();
    assert!(conn.is_closed());
    let err = conn.call(BackendRequest::Read { key: "k".into() }).await.unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::ConnectionClosed)));
}

#[tokio::test]
async fn test_redials_once_after_peer_hangs_up() {
    // The backend serves a single request per TCP connection.
    let address = spawn_backend(1).await;
    let conn = BackendConnection::connect(&address, &test_params()).await.unwrap();

    assert!(conn.call(BackendRequest::Read { key: "a".into() }).await.is_ok());
    // The peer closed after the first answer: this call fails and drops the stream.
    assert!(conn.call(BackendRequest::Read { key: "b".into() }).await.is_err());
    // A fresh stream is dialed lazily.
    let response = conn.call(BackendRequest::Read { key: "c".into() }).await.unwrap();
    assert_eq!(response.msg, "c");
}

#[tokio::test]
async fn test_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    // Accepts but never answers.
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let conn = BackendConnection::connect(&address, &test_params()).await.unwrap();
    let err = conn.call(BackendRequest::Read { key: "k".into() }).await.unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Timeout(_))));
}

#[tokio::test]
async fn test_tcp_dialer_returns_live_client() {
    let address = spawn_backend(1).await;
    let dialer = TcpDialer::new(test_params());

    let client = dialer.dial(&address).await.unwrap();
    let response = client.call(BackendRequest::Read { key: "k".into() }).await.unwrap();
    assert!(response.is_ok());
}

#[tokio::test]
async fn test_tcp_dialer_surfaces_connect_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let dialer = TcpDialer::new(test_params());
    assert!(dialer.dial(&address).await.is_err());
}
