use std::sync::Arc;

use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;

use super::*;
use crate::network::BackendClient;
use crate::network::BackendConnection;
use crate::protocol::BackendCodec;
use crate::protocol::BackendFrame;
use crate::protocol::BackendRequest;
use crate::protocol::BackendResponse;
use crate::protocol::ErrorCode;
use crate::protocol::ProtocolId;
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::router::slot_for_key;
use crate::MemoryStorageEngine;
use crate::MockStorageEngine;
use crate::NetworkConfig;
use crate::StorageEngine;
use crate::StorageError;

#[test]
fn test_execute_read_write_delete() {
    let engine = MemoryStorageEngine::new();

    let response = execute(&engine, BackendRequest::Read { key: "foo".into() });
    assert!(response.is_not_found());

    let response = execute(
        &engine,
        BackendRequest::Write {
            key: "foo".into(),
            value: "bar".into(),
        },
    );
    assert_eq!(response, BackendResponse::ok("OK"));

    let response = execute(&engine, BackendRequest::Read { key: "foo".into() });
    assert_eq!(response, BackendResponse::ok("bar"));

    let response = execute(&engine, BackendRequest::Delete { key: "foo".into() });
    assert!(response.is_ok());
    // deleting again still succeeds
    let response = execute(&engine, BackendRequest::Delete { key: "foo".into() });
    assert!(response.is_ok());
}

#[test]
fn test_execute_scan_and_write_nx() {
    let engine = MemoryStorageEngine::new();
    engine.write("foo", Bytes::from_static(b"1")).unwrap();

    let response = execute(
        &engine,
        BackendRequest::WriteNx {
            key: "foo".into(),
            value: "2".into(),
        },
    );
    assert_eq!(response.msg, "EXISTS");
    assert_eq!(engine.read("foo").unwrap(), Some(Bytes::from_static(b"1")));

    let response = execute(
        &engine,
        BackendRequest::WriteNx {
            key: "other".into(),
            value: "2".into(),
        },
    );
    assert_eq!(response.msg, "OK");

    let response = execute(
        &engine,
        BackendRequest::Scan {
            slot: slot_for_key(b"foo"),
        },
    );
    let keys: Vec<String> = serde_json::from_str(&response.msg).unwrap();
    assert!(keys.contains(&"foo".to_string()));
}

#[test]
fn test_execute_engine_failure_is_info() {
    let mut engine = MockStorageEngine::new();
    engine
        .expect_write()
        .returning(|_, _| Err(StorageError::DbError("disk full".into()).into()));

    let response = execute(
        &engine,
        BackendRequest::Write {
            key: "k".into(),
            value: "v".into(),
        },
    );
    assert_eq!(response.code, ErrorCode::Info);
    assert!(response.msg.contains("disk full"));
}

async fn start_server() -> (String, Arc<MemoryStorageEngine>, watch::Sender<()>) {
    let engine = Arc::new(MemoryStorageEngine::new());
    let server = CacheServer::bind("127.0.0.1:0".parse().unwrap(), engine.clone(), DEFAULT_MAX_FRAME_LEN)
        .await
        .unwrap();
    let address = server.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(server.serve(shutdown_rx));
    (address, engine, shutdown_tx)
}

#[tokio::test]
async fn test_serves_backend_connection() {
    let (address, engine, _shutdown) = start_server().await;
    let conn = BackendConnection::connect(&address, &NetworkConfig::default()).await.unwrap();

    let response = conn
        .call(BackendRequest::Write {
            key: "foo".into(),
            value: "bar".into(),
        })
        .await
        .unwrap();
    assert!(response.is_ok());
    assert_eq!(engine.read("foo").unwrap(), Some(Bytes::from_static(b"bar")));

    let response = conn.call(BackendRequest::Read { key: "foo".into() }).await.unwrap();
    assert_eq!(response.msg, "bar");
}

#[tokio::test]
async fn test_malformed_payload_keeps_connection_open() {
    let (address, _engine, _shutdown) = start_server().await;
    let socket = TcpStream::connect(&address).await.unwrap();
    let mut framed = Framed::new(socket, BackendCodec::default());

    framed
        .send(BackendFrame::new(ProtocolId::Read, Bytes::from_static(b"not json")))
        .await
        .unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    let response = BackendResponse::from_frame(&frame).unwrap();
    assert_eq!(response.code, ErrorCode::Info);

    framed
        .send(BackendRequest::Read { key: "k".into() }.to_frame().unwrap())
        .await
        .unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    assert!(BackendResponse::from_frame(&frame).unwrap().is_not_found());
}

#[tokio::test]
async fn test_stops_accepting_after_shutdown() {
    let (address, _engine, shutdown) = start_server().await;

    shutdown.send(()).unwrap();
    // Give the accept loop a moment to observe the signal.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(BackendConnection::connect(&address, &NetworkConfig::default())
        .await
        .is_err());
}
