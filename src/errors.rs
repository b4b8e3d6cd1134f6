//! Error hierarchy for the proxy, storage nodes and the admin side.
//!
//! Errors are grouped by the layer that produces them. Only the router turns
//! them into client-visible error replies; everything below propagates with `?`.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client-facing RESP protocol violations
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Storage node round-trip failures (dial, I/O, malformed frames)
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Metadata store lookups, decoding and watch failures
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Command validation and slot routing failures
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Storage engine failures on a cache server node
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Slot migration failures
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// First byte of a request is not the array marker
    #[error("Protocol error: expected '*', got byte {0:#04x}")]
    InvalidPrefix(u8),

    /// Bulk string header did not start with `$`
    #[error("Protocol error: expected '$', got byte {0:#04x}")]
    InvalidBulkPrefix(u8),

    /// Malformed or out of range length field
    #[error("Protocol error: invalid length '{0}'")]
    InvalidLength(String),

    /// Payload not followed by CRLF
    #[error("Protocol error: missing CRLF terminator")]
    MissingTerminator,

    /// Reply type byte not understood by the client codec
    #[error("Protocol error: unknown reply type byte {0:#04x}")]
    InvalidReplyType(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dial failure for a storage node
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or request deadline exceeded
    #[error("Backend operation timed out after {0:?}")]
    Timeout(Duration),

    /// Connection was closed locally or by the peer
    #[error("Backend connection closed")]
    ConnectionClosed,

    /// Frame carries a protocol id outside the known set
    #[error("Unknown backend protocol id {0}")]
    UnknownProtocol(u32),

    /// Response frame did not carry the MESSAGE protocol id
    #[error("Unexpected backend protocol id {0}")]
    UnexpectedProtocol(u32),

    /// Response carries a status code outside the known set
    #[error("Unknown backend status code {0}")]
    UnknownStatus(u32),

    /// Frame payload above the configured limit
    #[error("Backend frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Request or response payload failed to (de)serialize
    #[error("Malformed backend payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Request payload had the wrong number of elements
    #[error("Malformed backend request: {0}")]
    BadRequest(String),

    /// Cache server answered with the INFO status
    #[error("cache server error: {0}")]
    Server(String),

    /// Key or value not representable in the JSON payload
    #[error("Argument is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Store unreachable or request rejected
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    /// Record at `key` could not be decoded
    #[error("Malformed metadata record at {key}: {reason}")]
    Decode { key: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// No `/slot/<id>` record exists
    #[error("slot {0} is not assigned to any node")]
    UnassignedSlot(u32),

    /// Slot owner is not (or no longer) in the connection registry
    #[error("no connection to cache server {0}")]
    ConnectionNotFound(String),

    #[error("command not supported: {0}")]
    UnsupportedCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("invalid DB index: {0}")]
    InvalidDbIndex(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Slot {0} is out of range")]
    SlotOutOfRange(u32),

    #[error("Invalid slot range {start}..={end}")]
    InvalidRange { start: u32, end: u32 },

    #[error("Slot {0} is not assigned")]
    SlotNotAssigned(u32),

    #[error("Slot {0} is already migrating")]
    AlreadyMigrating(u32),

    #[error("Slot {slot} is already owned by {owner}")]
    SameOwner { slot: u32, owner: String },

    #[error("Cache server {0} is not registered")]
    NodeNotRegistered(String),

    #[error("Migration task {0} not found")]
    TaskNotFound(u64),

    #[error("Migration task {id} is {status}, expected PENDING")]
    TaskNotPending { id: u64, status: String },

    /// Keys kept appearing on the source after every copy pass
    #[error("Slot {slot} still had keys on the source after {passes} copy passes")]
    Unsettled { slot: u32, passes: usize },

    /// Slot record changed underneath the migration
    #[error("Slot {0} was modified concurrently")]
    Conflict(u32),

    #[error("Migration worker is not running")]
    WorkerStopped,
}

// ============== Conversion Implementations ============== //

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Backend(BackendError::Io(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Backend(BackendError::Payload(e))
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::Fatal(format!("Background task failed: {err}"))
    }
}

impl Error {
    /// Text carried by the error reply sent to a client
    pub fn reply_message(&self) -> String {
        format!("ERR {self}")
    }
}
