use bytes::Bytes;
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;

use super::*;
use crate::ProtocolError;

fn encode_reply(reply: Reply) -> Vec<u8> {
    let mut dst = BytesMut::new();
    RespCodec::new().encode(reply, &mut dst).unwrap();
    dst.to_vec()
}

#[test]
fn test_decode_set_command() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"[..]);

    let cmd = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(cmd.name, "SET");
    assert_eq!(cmd.args, vec![Bytes::from_static(b"foo"), Bytes::from_static(b"bar")]);
    assert!(buf.is_empty());
}

#[test]
fn test_decode_mixed_case_name_is_upper_cased() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPiNg\r\n"[..]);

    let cmd = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(cmd.name, "PING");
    assert!(cmd.args.is_empty());
}

#[test]
fn test_decode_binary_argument_kept_verbatim() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\n\r\n\x00\xff\r\n"[..]);

    let cmd = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(cmd.args[0].as_ref(), b"\r\n\x00\xff");
}

#[test]
fn test_decode_empty_bulk_argument() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$0\r\n\r\n"[..]);

    let cmd = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(cmd.args, vec![Bytes::new()]);
}

#[test]
fn test_decode_partial_input_consumes_nothing() {
    let mut codec = RespCodec::new();
    let full = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";

    for cut in 1..full.len() {
        let mut buf = BytesMut::from(&full[..cut]);
        assert!(codec.decode(&mut buf).unwrap().is_none(), "cut at {cut}");
        assert_eq!(buf.len(), cut);
    }
}

#[test]
fn test_decode_pipelined_commands_in_order() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"[..]);

    let first = codec.decode(&mut buf).unwrap().unwrap();
    let second = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(first.name, "PING");
    assert_eq!(second.name, "GET");
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_decode_rejects_inline_command() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"PING\r\n"[..]);

    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::InvalidPrefix(b'P'))
    ));
}

#[test]
fn test_decode_rejects_non_bulk_argument() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"*1\r\n:4\r\n"[..]);

    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::InvalidBulkPrefix(b':'))
    ));
}

#[test]
fn test_decode_rejects_bad_lengths() {
    let mut codec = RespCodec::new();

    for input in [
        &b"*x\r\n"[..],
        &b"*0\r\n"[..],
        &b"*-1\r\n"[..],
        &b"*1\r\n$-5\r\n"[..],
        &b"*1\r\n$abc\r\n"[..],
    ] {
        let mut buf = BytesMut::from(input);
        assert!(
            matches!(codec.decode(&mut buf), Err(ProtocolError::InvalidLength(_))),
            "input {:?}",
            String::from_utf8_lossy(input)
        );
    }
}

#[test]
fn test_decode_rejects_oversized_bulk() {
    let mut codec = RespCodec::new().with_max_bulk_len(4);
    let mut buf = BytesMut::from(&b"*1\r\n$5\r\n"[..]);

    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::InvalidLength(_))
    ));
}

#[test]
fn test_decode_rejects_missing_terminator() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPINGxx"[..]);

    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::MissingTerminator)
    ));

    let mut buf = BytesMut::from(&b"*1\n"[..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::MissingTerminator)
    ));
}

#[test]
fn test_decode_eof_with_truncated_frame_errors() {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n"[..]);

    assert!(codec.decode_eof(&mut buf).is_err());
}

#[test]
fn test_encode_replies() {
    assert_eq!(encode_reply(Reply::ok()), b"+OK\r\n");
    assert_eq!(encode_reply(Reply::Status("PONG".into())), b"+PONG\r\n");
    assert_eq!(encode_reply(Reply::error("ERR boom")), b"-ERR boom\r\n");
    assert_eq!(encode_reply(Reply::Integer(1)), b":1\r\n");
    assert_eq!(encode_reply(Reply::Integer(-3)), b":-3\r\n");
    assert_eq!(encode_reply(Reply::Bulk(Bytes::from_static(b"bar"))), b"$3\r\nbar\r\n");
    assert_eq!(encode_reply(Reply::Bulk(Bytes::new())), b"$0\r\n\r\n");
    assert_eq!(encode_reply(Reply::Null), b"$-1\r\n");
}

#[test]
fn test_encode_error_strips_line_breaks() {
    assert_eq!(encode_reply(Reply::error("ERR a\r\nb")), b"-ERR a  b\r\n");
}

#[test]
fn test_client_codec_command_is_readable_by_server_codec() {
    let command = Command::new(
        "set",
        vec![Bytes::from_static(b"k\x00"), Bytes::from_static(b"\xfe\xff")],
    );
    let mut wire = BytesMut::new();
    RespClientCodec.encode(command.clone(), &mut wire).unwrap();

    let decoded = RespCodec::new().decode(&mut wire).unwrap().unwrap();
    assert_eq!(decoded, command);
    assert_eq!(decoded.name, "SET");
}

#[test]
fn test_client_codec_decodes_every_reply_kind() {
    let replies = vec![
        Reply::ok(),
        Reply::error("ERR slot 3 is not assigned to any node"),
        Reply::Integer(1),
        Reply::Bulk(Bytes::from_static(b"a\r\nb")),
        Reply::Null,
    ];
    let mut wire = BytesMut::new();
    for reply in &replies {
        reply.write_to(&mut wire);
    }

    let mut codec = RespClientCodec;
    let mut decoded = Vec::new();
    while let Some(reply) = codec.decode(&mut wire).unwrap() {
        decoded.push(reply);
    }
    assert_eq!(decoded, replies);
}

#[test]
fn test_client_codec_waits_for_complete_bulk() {
    let mut codec = RespClientCodec;
    let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);

    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(b"lo\r\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Reply::Bulk(Bytes::from_static(b"hello")))
    );
}

#[test]
fn test_client_codec_rejects_unknown_type() {
    let mut codec = RespClientCodec;
    let mut buf = BytesMut::from(&b"*1\r\n"[..]);

    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::InvalidReplyType(b'*'))
    ));
}
