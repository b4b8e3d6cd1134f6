//! Client-facing RESP codec.
//!
//! Requests are arrays of bulk strings (`*<n>\r\n` followed by `n` times
//! `$<len>\r\n<bytes>\r\n`). Replies are status, error, integer, bulk and null
//! bulk frames. Both directions are exposed as `tokio_util` codecs so the proxy
//! can drive a connection through `Framed`.

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;

use crate::constants::MAX_ARRAY_LEN;
use crate::constants::MAX_BULK_LEN;
use crate::ProtocolError;

const CRLF: &[u8] = b"\r\n";

/// Longest header line (`*<n>` / `$<len>`) accepted before the LF shows up
const MAX_HEADER_LEN: usize = 32;

/// A parsed client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command name, upper-cased
    pub name: String,
    /// Remaining arguments, opaque bytes
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn new(
        name: impl AsRef<str>,
        args: Vec<Bytes>,
    ) -> Self {
        Self {
            name: name.as_ref().to_ascii_uppercase(),
            args,
        }
    }

    /// Serializes the command as a RESP array of bulk strings
    pub fn write_to(
        &self,
        dst: &mut BytesMut,
    ) {
        dst.put_u8(b'*');
        dst.put_slice((self.args.len() + 1).to_string().as_bytes());
        dst.put_slice(CRLF);
        write_bulk(dst, self.name.as_bytes());
        for arg in &self.args {
            write_bulk(dst, arg);
        }
    }
}

/// A reply frame sent back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<msg>`
    Status(String),
    /// `-<msg>`
    Error(String),
    /// `:<n>`
    Integer(i64),
    /// `$<len>\r\n<bytes>`
    Bulk(Bytes),
    /// `$-1`, used for missing keys
    Null,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    pub fn write_to(
        &self,
        dst: &mut BytesMut,
    ) {
        match self {
            Reply::Status(msg) => write_line(dst, b'+', msg),
            Reply::Error(msg) => write_line(dst, b'-', msg),
            Reply::Integer(n) => {
                dst.put_u8(b':');
                dst.put_slice(n.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Reply::Bulk(bytes) => write_bulk(dst, bytes),
            Reply::Null => dst.put_slice(b"$-1\r\n"),
        }
    }
}

fn write_bulk(
    dst: &mut BytesMut,
    payload: &[u8],
) {
    dst.reserve(payload.len() + 16);
    dst.put_u8(b'$');
    dst.put_slice(payload.len().to_string().as_bytes());
    dst.put_slice(CRLF);
    dst.put_slice(payload);
    dst.put_slice(CRLF);
}

/// Status and error lines cannot carry CR or LF
fn write_line(
    dst: &mut BytesMut,
    prefix: u8,
    msg: &str,
) {
    dst.put_u8(prefix);
    for b in msg.bytes() {
        dst.put_u8(if b == b'\r' || b == b'\n' { b' ' } else { b });
    }
    dst.put_slice(CRLF);
}

/// Locates the CRLF-terminated line starting at `start`.
///
/// Returns the line content (without the type byte and CRLF) as a range, and
/// the offset of the first byte after the line. `Ok(None)` means more input is
/// needed.
fn read_line(
    src: &[u8],
    start: usize,
) -> Result<Option<(std::ops::Range<usize>, usize)>, ProtocolError> {
    let Some(lf) = src[start..].iter().position(|b| *b == b'\n').map(|p| start + p) else {
        if src.len() - start > MAX_HEADER_LEN {
            return Err(ProtocolError::InvalidLength(
                String::from_utf8_lossy(&src[start..start + MAX_HEADER_LEN]).into_owned(),
            ));
        }
        return Ok(None);
    };
    if lf <= start + 1 || src[lf - 1] != b'\r' {
        return Err(ProtocolError::MissingTerminator);
    }
    Ok(Some((start + 1..lf - 1, lf + 1)))
}

fn parse_int(digits: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidLength(String::from_utf8_lossy(digits).into_owned()))
}

/// Reads a `<type><int>\r\n` header at `start`
fn read_int_header(
    src: &[u8],
    start: usize,
) -> Result<Option<(i64, usize)>, ProtocolError> {
    match read_line(src, start)? {
        Some((digits, next)) => Ok(Some((parse_int(&src[digits])?, next))),
        None => Ok(None),
    }
}

/// Server side codec: decodes [`Command`]s, encodes [`Reply`]s
#[derive(Debug, Clone)]
pub struct RespCodec {
    max_bulk_len: usize,
    max_array_len: usize,
}

impl Default for RespCodec {
    fn default() -> Self {
        Self {
            max_bulk_len: MAX_BULK_LEN,
            max_array_len: MAX_ARRAY_LEN,
        }
    }
}

impl RespCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bulk_len(
        mut self,
        max_bulk_len: usize,
    ) -> Self {
        self.max_bulk_len = max_bulk_len;
        self
    }
}

impl Decoder for RespCodec {
    type Item = Command;
    type Error = ProtocolError;

    /// Nothing is consumed from `src` until a whole command is buffered.
    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Command>, ProtocolError> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != b'*' {
            return Err(ProtocolError::InvalidPrefix(src[0]));
        }

        let Some((count, mut cursor)) = read_int_header(src, 0)? else {
            return Ok(None);
        };
        if count < 1 || count as u64 > self.max_array_len as u64 {
            return Err(ProtocolError::InvalidLength(count.to_string()));
        }

        let mut spans = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if cursor >= src.len() {
                return Ok(None);
            }
            if src[cursor] != b'$' {
                return Err(ProtocolError::InvalidBulkPrefix(src[cursor]));
            }
            let Some((len, body_start)) = read_int_header(src, cursor)? else {
                return Ok(None);
            };
            if len < 0 || len as u64 > self.max_bulk_len as u64 {
                return Err(ProtocolError::InvalidLength(len.to_string()));
            }

            let body_end = body_start + len as usize;
            if src.len() < body_end + CRLF.len() {
                src.reserve(body_end + CRLF.len() - src.len());
                return Ok(None);
            }
            if &src[body_end..body_end + CRLF.len()] != CRLF {
                return Err(ProtocolError::MissingTerminator);
            }
            spans.push(body_start..body_end);
            cursor = body_end + CRLF.len();
        }

        let frame = src.split_to(cursor).freeze();
        let mut args = spans.into_iter().map(|span| frame.slice(span));
        let name = args.next().unwrap_or_default();

        Ok(Some(Command::new(String::from_utf8_lossy(&name), args.collect())))
    }
}

impl Encoder<Reply> for RespCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        reply: Reply,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        reply.write_to(dst);
        Ok(())
    }
}

/// Client side mirror of [`RespCodec`]: encodes [`Command`]s, decodes [`Reply`]s
#[derive(Debug, Clone, Default)]
pub struct RespClientCodec;

impl Encoder<Command> for RespClientCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        command: Command,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        command.write_to(dst);
        Ok(())
    }
}

impl Decoder for RespClientCodec {
    type Item = Reply;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Reply>, ProtocolError> {
        if src.is_empty() {
            return Ok(None);
        }

        match src[0] {
            b'+' | b'-' => {
                let Some(lf) = src.iter().position(|b| *b == b'\n') else {
                    return Ok(None);
                };
                if lf == 0 || src[lf - 1] != b'\r' {
                    return Err(ProtocolError::MissingTerminator);
                }
                let line = src.split_to(lf + 1);
                let msg = String::from_utf8_lossy(&line[1..lf - 1]).into_owned();
                Ok(Some(if line[0] == b'+' {
                    Reply::Status(msg)
                } else {
                    Reply::Error(msg)
                }))
            }
            b':' => {
                let Some((n, next)) = read_int_header(src, 0)? else {
                    return Ok(None);
                };
                let _ = src.split_to(next);
                Ok(Some(Reply::Integer(n)))
            }
            b'$' => {
                let Some((len, body_start)) = read_int_header(src, 0)? else {
                    return Ok(None);
                };
                if len == -1 {
                    let _ = src.split_to(body_start);
                    return Ok(Some(Reply::Null));
                }
                if len < 0 || len as u64 > MAX_BULK_LEN as u64 {
                    return Err(ProtocolError::InvalidLength(len.to_string()));
                }
                let body_end = body_start + len as usize;
                if src.len() < body_end + CRLF.len() {
                    return Ok(None);
                }
                if &src[body_end..body_end + CRLF.len()] != CRLF {
                    return Err(ProtocolError::MissingTerminator);
                }
                let frame = src.split_to(body_end + CRLF.len()).freeze();
                Ok(Some(Reply::Bulk(frame.slice(body_start..body_end))))
            }
            other => Err(ProtocolError::InvalidReplyType(other)),
        }
    }
}
