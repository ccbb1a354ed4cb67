// ott-protocol: wire format and control-plane message types.
//
// Two surfaces live here: the fixed-header datagram packet carried over
// UDP, and the JSON command/event unions carried over WebSocket text
// frames. Both are frozen; the server and every test client depend on
// this crate and nothing else for framing.

pub mod command;
pub mod event;
pub mod media;
pub mod packet;

pub use command::ClientCommand;
pub use event::{ContinueItem, ServerEvent, VideoDetail, VideoSummary};
pub use media::{MEDIA_HEADER_LEN, MediaFrame, SegmentKind};
pub use packet::{HEADER_LEN, MAX_DATAGRAM, MAX_PAYLOAD, Packet, PacketFlags, WireError};

/// Hard resource bounds shared by both ends of the transport.
pub mod limits {
    /// Connection-table capacity of one engine.
    pub const MAX_CONNECTIONS: usize = 32;
    /// Live streams per connection.
    pub const MAX_STREAMS: usize = 16;
    /// Outstanding unacked DATA packets per engine.
    pub const MAX_PENDING: usize = 32;
    /// Seconds of inactivity before a connection is evicted.
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
    /// Seconds a session row lives without being extended.
    pub const SESSION_TTL_SECS: u64 = 1800;
}

/// Frozen status strings used in `error`/`*_ok` event frames.
pub mod status {
    pub const OK: &str = "ok";
    pub const ERROR: &str = "error";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const DB_ERROR: &str = "db_error";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const CONNECTION_NOT_FOUND: &str = "connection-not-found";
    pub const CONNECTION_NOT_READY: &str = "connection-not-ready";
    pub const STREAM_FAILED: &str = "stream_failed";
    pub const SEND_FAILED: &str = "quic_send_failed";
}
