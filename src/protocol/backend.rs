//! Binary protocol between the proxy and the cache server nodes.
//!
//! Every frame is an 8 byte header (big-endian protocol id, big-endian payload
//! length) followed by the payload. Requests carry a JSON array of strings,
//! responses a JSON object `{"err": <code>, "msg": "<text>"}` inside a MESSAGE
//! frame.

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;
use tokio_util::codec::Framed;

use crate::constants::BACKEND_HEADER_LEN;
use crate::BackendError;

/// Default upper bound for a single backend frame payload (64MB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    Read,
    Write,
    Delete,
    /// Response frames
    Message,
    /// List the keys of one slot
    Scan,
    /// Write unless the key already exists
    WriteNx,
}

impl ProtocolId {
    pub const fn code(self) -> u32 {
        match self {
            ProtocolId::Read => 1001,
            ProtocolId::Write => 1002,
            ProtocolId::Delete => 1003,
            ProtocolId::Message => 1004,
            ProtocolId::Scan => 1005,
            ProtocolId::WriteNx => 1006,
        }
    }
}

impl TryFrom<u32> for ProtocolId {
    type Error = BackendError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1001 => Ok(ProtocolId::Read),
            1002 => Ok(ProtocolId::Write),
            1003 => Ok(ProtocolId::Delete),
            1004 => Ok(ProtocolId::Message),
            1005 => Ok(ProtocolId::Scan),
            1006 => Ok(ProtocolId::WriteNx),
            other => Err(BackendError::UnknownProtocol(other)),
        }
    }
}

/// Status carried in the `err` field of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    /// Server-side failure, `msg` carries the reason
    Info,
    NotFound,
}

impl ErrorCode {
    pub const fn code(self) -> u32 {
        match self {
            ErrorCode::NoError => 1000,
            ErrorCode::Info => 1001,
            ErrorCode::NotFound => 1002,
        }
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = BackendError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1000 => Ok(ErrorCode::NoError),
            1001 => Ok(ErrorCode::Info),
            1002 => Ok(ErrorCode::NotFound),
            other => Err(BackendError::UnknownStatus(other)),
        }
    }
}

/// One raw frame as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFrame {
    pub protocol: u32,
    pub payload: Bytes,
}

impl BackendFrame {
    pub fn new(
        kind: ProtocolId,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            protocol: kind.code(),
            payload: payload.into(),
        }
    }
}

/// Serializes a frame header and payload into one buffer
pub fn encode_frame(
    kind: ProtocolId,
    payload: &[u8],
) -> Bytes {
    let mut dst = BytesMut::with_capacity(BACKEND_HEADER_LEN + payload.len());
    dst.put_u32(kind.code());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    dst.freeze()
}

/// Length-prefixed framing shared by both ends of a backend connection
#[derive(Debug, Clone)]
pub struct BackendCodec {
    max_frame_len: usize,
}

impl Default for BackendCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl BackendCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(u32::MAX as usize),
        }
    }
}

impl Decoder for BackendCodec {
    type Item = BackendFrame;
    type Error = BackendError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<BackendFrame>, BackendError> {
        if src.len() < BACKEND_HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..BACKEND_HEADER_LEN];
        let protocol = header.get_u32();
        let size = header.get_u32() as usize;
        if size > self.max_frame_len {
            return Err(BackendError::FrameTooLarge {
                size,
                max: self.max_frame_len,
            });
        }

        if src.len() < BACKEND_HEADER_LEN + size {
            src.reserve(BACKEND_HEADER_LEN + size - src.len());
            return Ok(None);
        }

        src.advance(BACKEND_HEADER_LEN);
        let payload = src.split_to(size).freeze();
        Ok(Some(BackendFrame { protocol, payload }))
    }
}

impl Encoder<BackendFrame> for BackendCodec {
    type Error = BackendError;

    fn encode(
        &mut self,
        frame: BackendFrame,
        dst: &mut BytesMut,
    ) -> Result<(), BackendError> {
        let size = frame.payload.len();
        if size > self.max_frame_len {
            return Err(BackendError::FrameTooLarge {
                size,
                max: self.max_frame_len,
            });
        }

        dst.reserve(BACKEND_HEADER_LEN + size);
        dst.put_u32(frame.protocol);
        dst.put_u32(size as u32);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Typed request sent to a cache server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRequest {
    Read { key: String },
    Write { key: String, value: String },
    Delete { key: String },
    Scan { slot: u32 },
    WriteNx { key: String, value: String },
}

impl BackendRequest {
    pub fn protocol(&self) -> ProtocolId {
        match self {
            BackendRequest::Read { .. } => ProtocolId::Read,
            BackendRequest::Write { .. } => ProtocolId::Write,
            BackendRequest::Delete { .. } => ProtocolId::Delete,
            BackendRequest::Scan { .. } => ProtocolId::Scan,
            BackendRequest::WriteNx { .. } => ProtocolId::WriteNx,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            BackendRequest::Read { key }
            | BackendRequest::Write { key, .. }
            | BackendRequest::Delete { key }
            | BackendRequest::WriteNx { key, .. } => Some(key),
            BackendRequest::Scan { .. } => None,
        }
    }

    pub fn to_frame(&self) -> Result<BackendFrame, BackendError> {
        let payload = match self {
            BackendRequest::Read { key } | BackendRequest::Delete { key } => serde_json::to_vec(&[key])?,
            BackendRequest::Write { key, value } | BackendRequest::WriteNx { key, value } => {
                serde_json::to_vec(&[key, value])?
            }
            BackendRequest::Scan { slot } => serde_json::to_vec(&[slot.to_string()])?,
        };
        Ok(BackendFrame::new(self.protocol(), payload))
    }

    pub fn from_frame(frame: &BackendFrame) -> Result<Self, BackendError> {
        let kind = ProtocolId::try_from(frame.protocol)?;
        let mut parts: Vec<String> = serde_json::from_slice(&frame.payload)?;

        let expected = match kind {
            ProtocolId::Read | ProtocolId::Delete | ProtocolId::Scan => 1,
            ProtocolId::Write | ProtocolId::WriteNx => 2,
            ProtocolId::Message => return Err(BackendError::UnexpectedProtocol(frame.protocol)),
        };
        if parts.len() != expected {
            return Err(BackendError::BadRequest(format!(
                "{kind:?} expects {expected} element(s), got {}",
                parts.len()
            )));
        }

        let value = if expected == 2 { parts.pop() } else { None };
        let key = parts.pop().unwrap_or_default();
        Ok(match (kind, value) {
            (ProtocolId::Read, _) => BackendRequest::Read { key },
            (ProtocolId::Delete, _) => BackendRequest::Delete { key },
            (ProtocolId::Scan, _) => {
                let slot = key
                    .parse::<u32>()
                    .map_err(|_| BackendError::BadRequest(format!("invalid slot id '{key}'")))?;
                BackendRequest::Scan { slot }
            }
            (ProtocolId::Write, value) => BackendRequest::Write {
                key,
                value: value.unwrap_or_default(),
            },
            (_, value) => BackendRequest::WriteNx {
                key,
                value: value.unwrap_or_default(),
            },
        })
    }
}

#[derive(Serialize, Deserialize)]
struct ResponsePayload {
    err: u32,
    msg: String,
}

/// Typed response returned by a cache server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub code: ErrorCode,
    pub msg: String,
}

impl BackendResponse {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::NoError,
            msg: msg.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            code: ErrorCode::NotFound,
            msg: String::new(),
        }
    }

    pub fn info(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Info,
            msg: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::NoError
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn to_frame(&self) -> Result<BackendFrame, BackendError> {
        let payload = serde_json::to_vec(&ResponsePayload {
            err: self.code.code(),
            msg: self.msg.clone(),
        })?;
        Ok(BackendFrame::new(ProtocolId::Message, payload))
    }

    pub fn from_frame(frame: &BackendFrame) -> Result<Self, BackendError> {
        if frame.protocol != ProtocolId::Message.code() {
            return Err(BackendError::UnexpectedProtocol(frame.protocol));
        }
        let payload: ResponsePayload = serde_json::from_slice(&frame.payload)?;
        Ok(Self {
            code: ErrorCode::try_from(payload.err)?,
            msg: payload.msg,
        })
    }
}

pub async fn write_request<T>(
    framed: &mut Framed<T, BackendCodec>,
    request: &BackendRequest,
) -> Result<(), BackendError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(request.to_frame()?).await
}

/// Reads one response frame; a clean EOF is reported as `ConnectionClosed`
pub async fn read_response<T>(framed: &mut Framed<T, BackendCodec>) -> Result<BackendResponse, BackendError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(frame) => BackendResponse::from_frame(&frame?),
        None => Err(BackendError::ConnectionClosed),
    }
}

/// Reads one request frame on the server side.
///
/// The outer error means the stream is unusable. The inner error means the
/// frame was well delimited but its content is malformed, so the connection
/// can keep going after answering it. `Ok(None)` is a clean EOF.
pub async fn read_request<T>(
    framed: &mut Framed<T, BackendCodec>
) -> Result<Option<Result<BackendRequest, BackendError>>, BackendError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(frame) => Ok(Some(BackendRequest::from_frame(&frame?))),
        None => Ok(None),
    }
}

pub async fn write_response<T>(
    framed: &mut Framed<T, BackendCodec>,
    response: &BackendResponse,
) -> Result<(), BackendError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(response.to_frame()?).await
}
