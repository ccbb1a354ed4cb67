//! Command dispatch for the WebSocket control plane.
//!
//! One text frame in, one or more frames out. Non-fatal failures answer
//! with `{type:"error", status, message}` and leave the connection
//! usable; only I/O errors propagate and end the session.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tracing::{debug, warn};

use ott_protocol::command::MAX_PAYLOAD_HEX_LEN;
use ott_protocol::{
    ClientCommand, ContinueItem, MAX_PAYLOAD, Packet, PacketFlags, SegmentKind, ServerEvent,
    VideoDetail, VideoSummary, media::encode_media_frame, status,
};
use ott_transport::ConnectionState;

use crate::media::MediaTools;
use crate::state::ControlContext;
use crate::storage::{Storage, StorageError, Video};

use super::frame::{OpCode, write_frame};

/// Serialize an event onto a text frame.
pub async fn send_event<S>(stream: &mut S, event: &ServerEvent) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(event)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_frame(stream, OpCode::Text, json.as_bytes()).await
}

async fn send_error<S>(stream: &mut S, status: &str, message: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    send_event(stream, &ServerEvent::error(status, message)).await
}

/// Handle one inbound text frame.
pub async fn handle_text<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    payload: &[u8],
    user_id: Option<i64>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return send_error(stream, status::BAD_REQUEST, "empty-payload").await;
    }
    let command: ClientCommand = match serde_json::from_slice(payload) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!(error = %e, "unparseable command");
            return send_error(stream, status::BAD_REQUEST, "unknown-command").await;
        }
    };

    match command {
        ClientCommand::Ping => {
            send_event(
                stream,
                &ServerEvent::Pong {
                    status: status::OK.to_owned(),
                    message: "alive".to_owned(),
                },
            )
            .await
        }
        ClientCommand::QuicSend {
            connection_id,
            stream_id,
            offset,
            payload_hex,
        } => quic_send(stream, ctx, connection_id, stream_id, offset, &payload_hex).await,
        ClientCommand::ListVideos => list_videos(stream, ctx).await,
        ClientCommand::ListContinue => list_continue(stream, ctx, user_id).await,
        ClientCommand::VideoDetail { video_id } => video_detail(stream, ctx, video_id).await,
        ClientCommand::StreamStart {
            video_id,
            connection_id,
            stream_id,
            chunk_length,
        } => stream_start(stream, ctx, video_id, connection_id, stream_id, chunk_length).await,
        ClientCommand::StreamChunk {
            video_id,
            connection_id,
            stream_id,
            offset,
            length,
        } => stream_chunk(stream, ctx, video_id, connection_id, stream_id, offset, length).await,
        ClientCommand::WatchGet { video_id } => watch_get(stream, ctx, video_id, user_id).await,
        ClientCommand::WatchUpdate { video_id, position } => {
            watch_update(stream, ctx, video_id, position, user_id).await
        }
        ClientCommand::WsInit { video_id } => ws_init(stream, ctx, video_id).await,
        ClientCommand::WsSegment { video_id, segment } => {
            ws_segment(stream, ctx, video_id, segment).await
        }
    }
}

// ---------------------------------------------------------------------------
// Transport commands
// ---------------------------------------------------------------------------

async fn quic_send<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    connection_id: u64,
    stream_id: u32,
    offset: u32,
    payload_hex: &str,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let Some(conn_state) = ctx.engine.connection_state(connection_id) else {
        return send_error(stream, status::CONNECTION_NOT_FOUND, "quic-connection-not-found")
            .await;
    };
    if conn_state != ConnectionState::Connected {
        let detail = format!("quic-connection-not-ready({conn_state})");
        return send_error(stream, status::CONNECTION_NOT_READY, &detail).await;
    }

    if payload_hex.len() > MAX_PAYLOAD_HEX_LEN {
        return send_error(stream, status::BAD_REQUEST, "payload-too-large").await;
    }
    let payload = match hex::decode(payload_hex) {
        Ok(bytes) if bytes.len() <= MAX_PAYLOAD => bytes,
        Ok(_) => return send_error(stream, status::BAD_REQUEST, "payload-too-large").await,
        Err(_) => return send_error(stream, status::BAD_REQUEST, "invalid-payload-hex").await,
    };

    let packet = Packet {
        flags: PacketFlags::DATA,
        connection_id,
        packet_number: ctx.next_packet_number(),
        stream_id,
        offset,
        payload: Bytes::from(payload),
    };
    match ctx.engine.send_to_connection(&packet).await {
        Ok(()) => {
            send_event(
                stream,
                &ServerEvent::QuicSend {
                    status: status::OK.to_owned(),
                    message: format!("sent-pn-{}", packet.packet_number),
                },
            )
            .await
        }
        Err(e) => {
            debug!(connection_id, error = %e, "quic_send failed");
            send_error(stream, status::SEND_FAILED, "connection-not-found").await
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog commands
// ---------------------------------------------------------------------------

fn summary(video: &Video) -> VideoSummary {
    VideoSummary {
        id: video.id,
        title: video.title.clone(),
        description: video.description.clone(),
        thumbnail_path: video.thumbnail_path.clone(),
        duration: video.duration,
    }
}

async fn list_videos<S>(stream: &mut S, ctx: &Arc<ControlContext>) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    match ctx.storage.recent_videos(20) {
        Ok(videos) => {
            let items = videos.iter().map(summary).collect();
            send_event(stream, &ServerEvent::Videos { items }).await
        }
        Err(e) => {
            warn!(error = %e, "list_videos failed");
            send_error(stream, status::DB_ERROR, "list-failed").await
        }
    }
}

async fn list_continue<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    user_id: Option<i64>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let Some(user_id) = user_id else {
        return send_error(stream, status::UNAUTHORIZED, "login-required").await;
    };
    match ctx.storage.continue_watching(user_id, 10) {
        Ok(rows) => {
            let items = rows
                .into_iter()
                .map(|(video, position)| ContinueItem {
                    id: video.id,
                    title: video.title,
                    description: video.description,
                    thumbnail_path: video.thumbnail_path,
                    duration: video.duration,
                    position,
                })
                .collect();
            send_event(stream, &ServerEvent::ContinueVideos { items }).await
        }
        Err(e) => {
            warn!(error = %e, "list_continue failed");
            send_error(stream, status::DB_ERROR, "list-continue-failed").await
        }
    }
}

async fn video_detail<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    video_id: i64,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    match ctx.storage.video_by_id(video_id) {
        Ok(video) => {
            send_event(
                stream,
                &ServerEvent::VideoDetail(VideoDetail {
                    id: video.id,
                    title: video.title,
                    description: video.description,
                    file_path: video.file_path,
                    thumbnail_path: video.thumbnail_path,
                    duration: video.duration,
                    upload_date: video.upload_date,
                }),
            )
            .await
        }
        Err(StorageError::NotFound) => {
            send_error(stream, status::NOT_FOUND, "video-not-found").await
        }
        Err(e) => {
            warn!(error = %e, "video_detail failed");
            send_error(stream, status::DB_ERROR, "detail-failed").await
        }
    }
}

// ---------------------------------------------------------------------------
// Chunked UDP streaming
// ---------------------------------------------------------------------------

/// Absolute media path for a video row: absolute `file_path` is used
/// verbatim, anything else resolves under the video directory.
fn video_full_path(ctx: &ControlContext, video: &Video) -> PathBuf {
    let path = Path::new(&video.file_path);
    if path.is_absolute() {
        path.to_owned()
    } else {
        ctx.config.video_dir.join(path)
    }
}

async fn stream_start<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    video_id: i64,
    connection_id: u64,
    stream_id: u32,
    chunk_length: u32,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let video = match ctx.storage.video_by_id(video_id) {
        Ok(video) => video,
        Err(StorageError::NotFound) => {
            return send_error(stream, status::NOT_FOUND, "video-not-found").await;
        }
        Err(e) => {
            warn!(error = %e, "stream_start failed");
            return send_error(stream, status::DB_ERROR, "detail-failed").await;
        }
    };
    let full_path = video_full_path(ctx, &video);
    let Ok(meta) = tokio::fs::metadata(&full_path).await else {
        return send_error(stream, status::NOT_FOUND, "file-missing").await;
    };
    // The probe shells out; keep it off the async workers. Best effort:
    // 0.0 when the tool is unavailable.
    let media = Arc::clone(&ctx.media);
    let duration = tokio::task::spawn_blocking(move || media.probe_duration(&full_path))
        .await
        .map_or(0.0, |probed| probed.unwrap_or(0.0));

    send_event(
        stream,
        &ServerEvent::StreamStart {
            status: status::OK.to_owned(),
            id: video_id,
            total_bytes: meta.len(),
            // Reported as requested; the wire still caps each DATA
            // payload at 16 KiB.
            chunk_size: chunk_length,
            duration,
            connection_id,
            stream_id,
        },
    )
    .await
}

async fn stream_chunk<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    video_id: i64,
    connection_id: u64,
    stream_id: u32,
    offset: u32,
    length: u32,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let video = match ctx.storage.video_by_id(video_id) {
        Ok(video) => video,
        Err(StorageError::NotFound) => {
            return send_error(stream, status::NOT_FOUND, "video-not-found").await;
        }
        Err(e) => {
            warn!(error = %e, "stream_chunk failed");
            return send_error(stream, status::DB_ERROR, "detail-failed").await;
        }
    };
    let full_path = video_full_path(ctx, &video);
    match send_video_chunk(ctx, connection_id, stream_id, &full_path, offset, length).await {
        Ok(()) => {
            send_event(
                stream,
                &ServerEvent::StreamChunk {
                    status: status::OK.to_owned(),
                    offset,
                    length,
                },
            )
            .await
        }
        Err(e) => {
            debug!(video_id, connection_id, error = %e, "chunk send failed");
            send_error(stream, status::STREAM_FAILED, "chunk-send-failed").await
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ChunkError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("offset {0} past end of file")]
    OffsetPastEof(u32),
    #[error("transport: {0}")]
    Engine(#[from] ott_transport::EngineError),
}

/// Read `[offset, offset+length)` of the file and feed it into the
/// transport as DATA packets of at most 16 KiB, numbering each from the
/// shared context counter.
async fn send_video_chunk(
    ctx: &Arc<ControlContext>,
    connection_id: u64,
    stream_id: u32,
    path: &Path,
    offset: u32,
    length: u32,
) -> Result<(), ChunkError> {
    let meta = tokio::fs::metadata(path).await?;
    if u64::from(offset) >= meta.len() {
        return Err(ChunkError::OffsetPastEof(offset));
    }

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(io::SeekFrom::Start(u64::from(offset))).await?;

    let mut remaining = length as usize;
    let mut sent = 0u32;
    let mut buf = vec![0u8; MAX_PAYLOAD];
    while remaining > 0 && u64::from(offset) + u64::from(sent) < meta.len() {
        let want = remaining.min(MAX_PAYLOAD);
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        let packet = Packet {
            flags: PacketFlags::DATA,
            connection_id,
            packet_number: ctx.next_packet_number(),
            stream_id,
            offset: offset + sent,
            payload: Bytes::copy_from_slice(&buf[..n]),
        };
        ctx.engine.send_to_connection(&packet).await?;
        sent += n as u32;
        remaining -= n;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Watch history
// ---------------------------------------------------------------------------

async fn watch_get<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    video_id: i64,
    user_id: Option<i64>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let Some(user_id) = user_id else {
        return send_error(stream, status::UNAUTHORIZED, "login-required").await;
    };
    match ctx.storage.watch_position(user_id, video_id) {
        Ok(position) => {
            send_event(
                stream,
                &ServerEvent::WatchGet {
                    status: status::OK.to_owned(),
                    user_id,
                    video_id,
                    position,
                },
            )
            .await
        }
        Err(StorageError::NotFound) => {
            send_error(stream, status::NOT_FOUND, "history-missing").await
        }
        Err(e) => {
            warn!(error = %e, "watch_get failed");
            send_error(stream, status::DB_ERROR, "watch-get-failed").await
        }
    }
}

async fn watch_update<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    video_id: i64,
    position: i64,
    user_id: Option<i64>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let Some(user_id) = user_id else {
        return send_error(stream, status::UNAUTHORIZED, "login-required").await;
    };
    match ctx.storage.upsert_watch(user_id, video_id, position) {
        Ok(()) => {
            send_event(
                stream,
                &ServerEvent::WatchUpdate {
                    status: status::OK.to_owned(),
                    user_id,
                    position,
                },
            )
            .await
        }
        Err(e) => {
            warn!(error = %e, "watch_update failed");
            send_error(stream, status::DB_ERROR, "watch-update-failed").await
        }
    }
}

// ---------------------------------------------------------------------------
// In-band DASH delivery
// ---------------------------------------------------------------------------

/// Segment directory for one video: the stored `segment_path` when the
/// pipeline recorded one, the conventional layout otherwise.
fn segment_dir(ctx: &ControlContext, video_id: i64) -> PathBuf {
    if let Ok(video) = ctx.storage.video_by_id(video_id) {
        if !video.segment_path.is_empty() {
            return PathBuf::from(video.segment_path);
        }
    }
    ctx.config.segment_dir.join(video_id.to_string())
}

async fn ws_init<S>(stream: &mut S, ctx: &Arc<ControlContext>, video_id: i64) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let dir = segment_dir(ctx, video_id);
    let init_path = dir.join("init-stream0.m4s");
    let Ok(init_bytes) = tokio::fs::read(&init_path).await else {
        warn!(video_id, path = %init_path.display(), "init segment missing");
        return send_event(
            stream,
            &ServerEvent::WsSegment {
                status: status::ERROR.to_owned(),
                segment: 0,
                message: "init-missing".to_owned(),
            },
        )
        .await;
    };
    let frame = encode_media_frame(SegmentKind::Init, 0, &init_bytes);
    write_frame(stream, OpCode::Binary, &frame).await?;

    // Prefer the sidecar; fall back to the video row plus a directory
    // walk that stops at the first missing index.
    let (duration, total_segments) = match crate::media::read_segment_info(&dir) {
        Some(info) => (info.duration, info.total_segments),
        None => {
            let duration = ctx
                .storage
                .video_by_id(video_id)
                .map(|v| v.duration)
                .unwrap_or(0);
            (duration, crate::media::count_media_segments(&dir))
        }
    };

    send_event(
        stream,
        &ServerEvent::WsInit {
            status: status::OK.to_owned(),
            duration,
            total_segments,
        },
    )
    .await
}

async fn ws_segment<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    video_id: i64,
    segment: u32,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let path = segment_dir(ctx, video_id).join(format!("chunk-stream0-{segment:05}.m4s"));

    // One automatic retry on open failure.
    let mut bytes = None;
    for _ in 0..2 {
        if let Ok(data) = tokio::fs::read(&path).await {
            bytes = Some(data);
            break;
        }
    }
    let Some(data) = bytes else {
        warn!(video_id, segment, path = %path.display(), "segment missing");
        ctx.record_segment_sent(false);
        return send_event(
            stream,
            &ServerEvent::WsSegment {
                status: status::ERROR.to_owned(),
                segment,
                message: "segment-missing".to_owned(),
            },
        )
        .await;
    };

    let frame = encode_media_frame(SegmentKind::Media, segment, &data);
    write_frame(stream, OpCode::Binary, &frame).await?;
    ctx.record_segment_sent(true);
    send_event(
        stream,
        &ServerEvent::WsSegment {
            status: status::OK.to_owned(),
            segment,
            message: "segment-sent".to_owned(),
        },
    )
    .await
}
