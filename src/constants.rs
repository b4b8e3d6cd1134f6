// -
// Slot space

/// Number of slots the keyspace is divided into.
///
/// `slot(key) = crc32(key) % SLOT_COUNT`. Administrative slot ranges are
/// `0..=SLOT_COUNT - 1`.
pub const SLOT_COUNT: u32 = 1024;

// -
// Metadata store namespaces

/// Prefix of storage node registration records: `/cacheserver/<id>`
pub const CACHE_SERVER_PREFIX: &str = "/cacheserver/";

/// Prefix of slot assignment records: `/slot/<id>`
pub const SLOT_PREFIX: &str = "/slot/";

// -
// Wire limits

/// Largest bulk string accepted from clients (512MB)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest argument count accepted in a single client command
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Backend frame header: protocol id (4 bytes) + payload length (4 bytes)
pub const BACKEND_HEADER_LEN: usize = 8;

// -
// Replies

pub(crate) const WRITE_NX_STORED: &str = "OK";
pub(crate) const WRITE_NX_EXISTS: &str = "EXISTS";
