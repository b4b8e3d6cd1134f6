use bytes::Bytes;
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;
use tokio_util::codec::Framed;

use super::*;
use crate::BackendError;

#[test]
fn test_encode_frame_layout() {
    let frame = encode_frame(ProtocolId::Read, br#"["foo"]"#);

    assert_eq!(&frame[..4], &1001u32.to_be_bytes());
    assert_eq!(&frame[4..8], &7u32.to_be_bytes());
    assert_eq!(&frame[8..], br#"["foo"]"#);
}

#[test]
fn test_codec_decodes_what_encode_frame_produced() {
    let mut buf = BytesMut::from(&encode_frame(ProtocolId::Write, br#"["k","v"]"#)[..]);

    let frame = BackendCodec::default().decode(&mut buf).unwrap().unwrap();
    assert_eq!(frame.protocol, ProtocolId::Write.code());
    assert_eq!(frame.payload, Bytes::from_static(br#"["k","v"]"#));
    assert!(buf.is_empty());
}

#[test]
fn test_codec_waits_for_header_and_payload() {
    let wire = encode_frame(ProtocolId::Delete, br#"["key"]"#);
    let mut codec = BackendCodec::default();

    for cut in 0..wire.len() {
        let mut buf = BytesMut::from(&wire[..cut]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), cut);
    }
}

#[test]
fn test_codec_rejects_oversized_frames() {
    let mut codec = BackendCodec::new(4);
    let mut buf = BytesMut::from(&encode_frame(ProtocolId::Read, b"12345")[..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(BackendError::FrameTooLarge { size: 5, max: 4 })
    ));

    let mut dst = BytesMut::new();
    let frame = BackendFrame::new(ProtocolId::Read, Bytes::from_static(b"12345"));
    assert!(matches!(
        codec.encode(frame, &mut dst),
        Err(BackendError::FrameTooLarge { .. })
    ));
    assert!(dst.is_empty());
}

#[test]
fn test_request_payloads() {
    let cases = vec![
        (BackendRequest::Read { key: "foo".into() }, ProtocolId::Read, r#"["foo"]"#),
        (
            BackendRequest::Write {
                key: "foo".into(),
                value: "bar".into(),
            },
            ProtocolId::Write,
            r#"["foo","bar"]"#,
        ),
        (BackendRequest::Delete { key: "foo".into() }, ProtocolId::Delete, r#"["foo"]"#),
        (BackendRequest::Scan { slot: 289 }, ProtocolId::Scan, r#"["289"]"#),
        (
            BackendRequest::WriteNx {
                key: "a".into(),
                value: "b".into(),
            },
            ProtocolId::WriteNx,
            r#"["a","b"]"#,
        ),
    ];

    for (request, kind, payload) in cases {
        let frame = request.to_frame().unwrap();
        assert_eq!(frame.protocol, kind.code());
        assert_eq!(frame.payload.as_ref(), payload.as_bytes());
        assert_eq!(BackendRequest::from_frame(&frame).unwrap(), request);
    }
}

#[test]
fn test_request_rejects_wrong_arity() {
    let frame = BackendFrame::new(ProtocolId::Write, Bytes::from_static(br#"["only-key"]"#));
    assert!(matches!(
        BackendRequest::from_frame(&frame),
        Err(BackendError::BadRequest(_))
    ));
}

#[test]
fn test_request_rejects_unknown_protocol_and_bad_json() {
    let frame = BackendFrame {
        protocol: 42,
        payload: Bytes::from_static(br#"["k"]"#),
    };
    assert!(matches!(
        BackendRequest::from_frame(&frame),
        Err(BackendError::UnknownProtocol(42))
    ));

    let frame = BackendFrame::new(ProtocolId::Read, Bytes::from_static(b"not json"));
    assert!(matches!(
        BackendRequest::from_frame(&frame),
        Err(BackendError::Payload(_))
    ));
}

#[test]
fn test_response_payload_shape() {
    let frame = BackendResponse::not_found().to_frame().unwrap();

    assert_eq!(frame.protocol, 1004);
    let json: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(json["err"], 1002);
    assert_eq!(json["msg"], "");
}

#[test]
fn test_response_rejects_non_message_frame_and_unknown_status() {
    let frame = BackendFrame::new(ProtocolId::Read, Bytes::from_static(br#"{"err":1000,"msg":""}"#));
    assert!(matches!(
        BackendResponse::from_frame(&frame),
        Err(BackendError::UnexpectedProtocol(1001))
    ));

    let frame = BackendFrame::new(ProtocolId::Message, Bytes::from_static(br#"{"err":7,"msg":""}"#));
    assert!(matches!(
        BackendResponse::from_frame(&frame),
        Err(BackendError::UnknownStatus(7))
    ));
}

#[tokio::test]
async fn test_request_response_round_trip_over_stream() {
    let (client, server) = tokio::io::duplex(1024);
    let mut client = Framed::new(client, BackendCodec::default());
    let mut server = Framed::new(server, BackendCodec::default());

    let request = BackendRequest::Write {
        key: "foo".into(),
        value: "bar".into(),
    };
    write_request(&mut client, &request).await.unwrap();

    let received = read_request(&mut server).await.unwrap().unwrap().unwrap();
    assert_eq!(received, request);

    write_response(&mut server, &BackendResponse::ok("")).await.unwrap();
    let response = read_response(&mut client).await.unwrap();
    assert!(response.is_ok());
}

#[tokio::test]
async fn test_read_request_reports_malformed_payload_as_inner_error() {
    let (client, server) = tokio::io::duplex(1024);
    let mut client = Framed::new(client, BackendCodec::default());
    let mut server = Framed::new(server, BackendCodec::default());

    futures::SinkExt::send(
        &mut client,
        BackendFrame::new(ProtocolId::Read, Bytes::from_static(b"{")),
    )
    .await
    .unwrap();

    let received = read_request(&mut server).await.unwrap().unwrap();
    assert!(received.is_err());
}

#[tokio::test]
async fn test_read_response_on_closed_stream() {
    let (client, server) = tokio::io::duplex(64);
    let mut client = Framed::new(client, BackendCodec::default());
    drop(server);

    assert!(matches!(
        read_response(&mut client).await,
        Err(BackendError::ConnectionClosed)
    ));
}
