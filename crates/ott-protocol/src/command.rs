//! Client commands carried on WebSocket text frames.
//!
//! Every command is a JSON object with a top-level `type` tag.  Unknown
//! tags fail deserialization; the dispatcher answers those with a
//! `bad_request` error event rather than dropping the connection.

use serde::{Deserialize, Serialize};

use crate::packet::MAX_PAYLOAD;

/// Upper bound on the `payload_hex` string of a `quic_send` command:
/// two hex digits per payload byte.
pub const MAX_PAYLOAD_HEX_LEN: usize = MAX_PAYLOAD * 2;

fn default_stream_id() -> u32 {
    1
}

/// All command kinds understood by the dispatcher.
///
/// ```json
/// { "type": "quic_send", "connection_id": 11259375, "payload_hex": "102030" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ClientCommand {
    Ping,
    /// Push one DATA packet into a transport connection. The packet number
    /// is allocated server-side from the shared context counter.
    QuicSend {
        connection_id: u64,
        #[serde(default = "default_stream_id")]
        stream_id: u32,
        #[serde(default)]
        offset: u32,
        #[serde(default)]
        payload_hex: String,
    },
    ListVideos,
    ListContinue,
    VideoDetail {
        video_id: i64,
    },
    /// Announce intent to stream; replies with byte size, chunk size and
    /// probed duration. `chunk_size` in the reply echoes `chunk_length`
    /// as sent, even though the wire caps individual payloads at 16 KiB.
    StreamStart {
        video_id: i64,
        #[serde(default)]
        connection_id: u64,
        #[serde(default = "default_stream_id")]
        stream_id: u32,
        #[serde(default)]
        chunk_length: u32,
    },
    /// Feed `length` bytes of the file starting at `offset` into the
    /// transport as DATA packets.
    StreamChunk {
        video_id: i64,
        connection_id: u64,
        #[serde(default = "default_stream_id")]
        stream_id: u32,
        offset: u32,
        length: u32,
    },
    WatchGet {
        video_id: i64,
    },
    WatchUpdate {
        video_id: i64,
        position: i64,
    },
    /// Deliver the DASH init segment as a binary frame, then report
    /// duration and segment count.
    WsInit {
        video_id: i64,
    },
    /// Deliver one indexed DASH media segment as a binary frame.
    WsSegment {
        video_id: i64,
        segment: u32,
    },
}
