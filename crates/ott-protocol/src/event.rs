//! Server events carried on WebSocket text frames.
//!
//! Mirrors the command union: one `type`-tagged JSON object per frame.
//! Short acknowledgements reuse the `{type, status, message}` triple; the
//! listing/detail events carry structured rows.

use serde::{Deserialize, Serialize};

/// One row of a `videos` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub thumbnail_path: String,
    pub duration: i64,
}

/// One row of a `continue_videos` listing: a summary plus the saved
/// playback position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub thumbnail_path: String,
    pub duration: i64,
    pub position: i64,
}

/// Full video row for `video_detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDetail {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub thumbnail_path: String,
    pub duration: i64,
    pub upload_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ServerEvent {
    /// First frame after a successful upgrade.
    Ready { status: String, message: String },
    Pong { status: String, message: String },
    Error { status: String, message: String },
    /// Ack for a `quic_send`; `message` carries the allocated packet number.
    QuicSend { status: String, message: String },
    Videos { items: Vec<VideoSummary> },
    ContinueVideos { items: Vec<ContinueItem> },
    VideoDetail(VideoDetail),
    StreamStart {
        status: String,
        id: i64,
        total_bytes: u64,
        chunk_size: u32,
        duration: f64,
        connection_id: u64,
        stream_id: u32,
    },
    StreamChunk { status: String, offset: u32, length: u32 },
    WatchGet {
        status: String,
        user_id: i64,
        video_id: i64,
        position: i64,
    },
    WatchUpdate { status: String, user_id: i64, position: i64 },
    WsInit {
        status: String,
        duration: i64,
        total_segments: u32,
    },
    WsSegment {
        status: String,
        segment: u32,
        message: String,
    },
}

impl ServerEvent {
    /// Shorthand for the `{type:"error", status, message}` frame every
    /// non-fatal failure answers with.
    pub fn error(status: &str, message: &str) -> Self {
        Self::Error {
            status: status.to_owned(),
            message: message.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&ServerEvent::Ready {
            status: "ok".to_owned(),
            message: "websocket-ready".to_owned(),
        })
        .unwrap();
        assert!(json.starts_with(r#"{"type":"ready""#), "{json}");
    }

    #[test]
    fn videos_event_round_trips() {
        let ev = ServerEvent::Videos {
            items: vec![VideoSummary {
                id: 1,
                title: "clip".to_owned(),
                description: String::new(),
                thumbnail_path: "thumbs/1.jpg".to_owned(),
                duration: 12,
            }],
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(serde_json::from_str::<ServerEvent>(&json).unwrap(), ev);
    }

    #[test]
    fn video_detail_flattens_into_the_event_object() {
        let ev = ServerEvent::VideoDetail(VideoDetail {
            id: 5,
            title: "t".to_owned(),
            description: "d".to_owned(),
            file_path: "5.mp4".to_owned(),
            thumbnail_path: String::new(),
            duration: 9,
            upload_date: "2025-01-01 00:00:00".to_owned(),
        });
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "video_detail");
        assert_eq!(v["file_path"], "5.mp4");
    }
}
