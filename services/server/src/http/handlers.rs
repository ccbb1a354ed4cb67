//! Route handlers: account lifecycle, upload, admin video management.
//!
//! Each handler writes one complete response. Handler failures never
//! tear down the connection on their own; I/O errors propagate to the
//! worker, which closes the stream.

use std::io;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::auth;
use crate::media::MediaTools;
use crate::session::{self, SessionError};
use crate::state::ControlContext;
use crate::storage::{Storage, StorageError};

use super::request::HttpRequest;
use super::response::{status, write_json, write_json_error};

/// Upload size cap.
const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
    #[serde(default)]
    nickname: String,
}

#[derive(Deserialize)]
struct VideoUpdate {
    video_id: i64,
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct VideoRef {
    video_id: i64,
}

/// Field-size caps the JSON surface enforces before touching storage.
const MAX_USERNAME: usize = 64;
const MAX_TITLE: usize = 128;
const MAX_DESCRIPTION: usize = 512;

pub async fn signup<S>(
    stream: &mut S,
    request: &HttpRequest,
    body: &[u8],
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let Ok(creds) = serde_json::from_slice::<Credentials>(body) else {
        return write_json_error(stream, request, status::BAD_REQUEST, "invalid signup body").await;
    };
    if creds.username.is_empty()
        || creds.username.len() > MAX_USERNAME
        || creds.password.is_empty()
    {
        return write_json_error(stream, request, status::BAD_REQUEST, "invalid credentials").await;
    }
    let Ok(hash) = auth::hash_password(&creds.password) else {
        return write_json_error(stream, request, status::SERVER_ERROR, "hashing failed").await;
    };
    let nickname = if creds.nickname.is_empty() {
        creds.username.clone()
    } else {
        creds.nickname.clone()
    };
    match ctx.storage.create_user(&creds.username, &nickname, &hash) {
        Ok(user_id) => {
            info!(user_id, username = %creds.username, "user created");
            write_json(stream, request, status::CREATED, &json!({ "id": user_id })).await
        }
        Err(StorageError::Conflict(_)) => {
            write_json_error(stream, request, status::CONFLICT, "username taken").await
        }
        Err(e) => {
            warn!(error = %e, "signup failed");
            write_json_error(stream, request, status::SERVER_ERROR, "signup failed").await
        }
    }
}

pub async fn login<S>(
    stream: &mut S,
    request: &HttpRequest,
    body: &[u8],
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let Ok(creds) = serde_json::from_slice::<Credentials>(body) else {
        return write_json_error(stream, request, status::BAD_REQUEST, "invalid login body").await;
    };
    match ctx.sessions.login(&creds.username, &creds.password) {
        Ok(session_id) => {
            let extra = format!(
                "{}Set-Cookie: SID={session_id}; HttpOnly; Path=/\r\n",
                super::response::cors_headers(request)
            );
            let body = serde_json::to_vec(&json!({ "session_id": session_id }))
                .unwrap_or_else(|_| b"{}".to_vec());
            super::response::write_response(
                stream,
                status::OK,
                &extra,
                "application/json",
                &body,
            )
            .await
        }
        Err(SessionError::InvalidCredentials) => {
            write_json_error(stream, request, status::UNAUTHORIZED, "invalid credentials").await
        }
        Err(e) => {
            warn!(error = %e, "login failed");
            write_json_error(stream, request, status::SERVER_ERROR, "login failed").await
        }
    }
}

pub async fn logout<S>(
    stream: &mut S,
    request: &HttpRequest,
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let Some(session_id) = session::extract_session_id(request) else {
        return write_json_error(stream, request, status::UNAUTHORIZED, "no session").await;
    };
    match ctx.sessions.logout(&session_id) {
        Ok(()) => write_json(stream, request, status::OK, &json!({ "status": "ok" })).await,
        Err(e) => {
            warn!(error = %e, "logout failed");
            write_json_error(stream, request, status::SERVER_ERROR, "logout failed").await
        }
    }
}

/// Raw-body upload: the video arrives as `application/octet-stream`
/// with metadata in `X-Video-Title` / `X-Video-Description` headers.
/// The file lands in the video directory, the row is created, and the
/// probe/thumbnail/segment pipeline runs before the response so the
/// video is immediately streamable.
pub async fn upload<S>(
    stream: &mut S,
    request: &HttpRequest,
    body_prefix: Vec<u8>,
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if authenticated_user(request, ctx).is_none() {
        return write_json_error(stream, request, status::UNAUTHORIZED, "login required").await;
    }
    let title = request.header("x-video-title").unwrap_or("untitled").to_owned();
    let description = request.header("x-video-description").unwrap_or("").to_owned();
    if title.len() > MAX_TITLE || description.len() > MAX_DESCRIPTION {
        return write_json_error(stream, request, status::BAD_REQUEST, "metadata too long").await;
    }
    let declared = request.content_length();
    if declared == 0 {
        return write_json_error(stream, request, status::BAD_REQUEST, "empty upload").await;
    }
    if declared > MAX_UPLOAD_BYTES {
        return write_json_error(stream, request, status::PAYLOAD_TOO_LARGE, "upload too large")
            .await;
    }

    tokio::fs::create_dir_all(&ctx.config.video_dir).await?;
    let file_name = format!("upload-{}.mp4", hex::encode(rand::random::<[u8; 8]>()));
    let full_path = ctx.config.video_dir.join(&file_name);

    let mut file = tokio::fs::File::create(&full_path).await?;
    let mut received = 0usize;
    if !body_prefix.is_empty() {
        let take = body_prefix.len().min(declared);
        file.write_all(&body_prefix[..take]).await?;
        received += take;
    }
    let mut chunk = vec![0u8; 64 * 1024];
    while received < declared {
        let want = chunk.len().min(declared - received);
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n]).await?;
        received += n;
    }
    file.flush().await?;
    drop(file);

    if received < declared {
        let _ = tokio::fs::remove_file(&full_path).await;
        return write_json_error(stream, request, status::BAD_REQUEST, "truncated upload").await;
    }

    let video_id = match ctx.storage.create_video(&title, &description, &file_name, "", 0) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "upload row insert failed");
            let _ = tokio::fs::remove_file(&full_path).await;
            return write_json_error(stream, request, status::SERVER_ERROR, "upload failed").await;
        }
    };

    // Probe/thumbnail/segment off the async worker; failures leave the
    // row usable for plain byte streaming.
    let media = Arc::clone(&ctx.media);
    let storage = Arc::clone(&ctx.storage);
    let thumb_rel = format!("thumbs/{video_id}.jpg");
    let thumb_path = ctx.config.video_dir.join(&thumb_rel);
    let input = full_path.clone();
    let pipeline = tokio::task::spawn_blocking(move || {
        if let Ok(duration) = media.probe_duration(&input) {
            let _ = storage.update_video_duration(video_id, duration as i64);
        }
        if let Some(parent) = thumb_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if media.extract_thumbnail(&input, &thumb_path, "00:00:01").is_ok() {
            let _ = storage.update_video_thumbnail(video_id, &thumb_rel);
        }
        match media.segment(video_id, &input) {
            Ok(dir) => {
                let _ = storage.update_segment_path(video_id, &dir.to_string_lossy());
            }
            Err(e) => warn!(video_id, error = %e, "segmentation failed"),
        }
    });
    if let Err(e) = pipeline.await {
        warn!(video_id, error = %e, "media pipeline panicked");
    }

    info!(video_id, bytes = received, "upload stored");
    write_json(stream, request, status::CREATED, &json!({ "id": video_id })).await
}

pub async fn admin_video_list<S>(
    stream: &mut S,
    request: &HttpRequest,
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    match ctx.storage.recent_videos(100) {
        Ok(videos) => {
            let items: Vec<_> = videos
                .iter()
                .map(|v| {
                    json!({
                        "id": v.id,
                        "title": v.title,
                        "description": v.description,
                        "file_path": v.file_path,
                        "thumbnail_path": v.thumbnail_path,
                        "duration": v.duration,
                        "upload_date": v.upload_date,
                    })
                })
                .collect();
            write_json(stream, request, status::OK, &json!({ "items": items })).await
        }
        Err(e) => {
            warn!(error = %e, "admin list failed");
            write_json_error(stream, request, status::SERVER_ERROR, "list failed").await
        }
    }
}

pub async fn admin_video_update<S>(
    stream: &mut S,
    request: &HttpRequest,
    body: &[u8],
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if authenticated_user(request, ctx).is_none() {
        return write_json_error(stream, request, status::UNAUTHORIZED, "login required").await;
    }
    let Ok(update) = serde_json::from_slice::<VideoUpdate>(body) else {
        return write_json_error(stream, request, status::BAD_REQUEST, "invalid update body").await;
    };
    if update.title.len() > MAX_TITLE || update.description.len() > MAX_DESCRIPTION {
        return write_json_error(stream, request, status::BAD_REQUEST, "metadata too long").await;
    }
    match ctx
        .storage
        .update_video_metadata(update.video_id, &update.title, &update.description)
    {
        Ok(()) => write_json(stream, request, status::OK, &json!({ "status": "ok" })).await,
        Err(StorageError::NotFound) => {
            write_json_error(stream, request, status::NOT_FOUND, "no such video").await
        }
        Err(e) => {
            warn!(error = %e, "admin update failed");
            write_json_error(stream, request, status::SERVER_ERROR, "update failed").await
        }
    }
}

pub async fn admin_video_delete<S>(
    stream: &mut S,
    request: &HttpRequest,
    body: &[u8],
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if authenticated_user(request, ctx).is_none() {
        return write_json_error(stream, request, status::UNAUTHORIZED, "login required").await;
    }
    let Ok(video) = serde_json::from_slice::<VideoRef>(body) else {
        return write_json_error(stream, request, status::BAD_REQUEST, "invalid delete body").await;
    };
    match ctx.storage.delete_video(video.video_id) {
        Ok(()) => write_json(stream, request, status::OK, &json!({ "status": "ok" })).await,
        Err(StorageError::NotFound) => {
            write_json_error(stream, request, status::NOT_FOUND, "no such video").await
        }
        Err(e) => {
            warn!(error = %e, "admin delete failed");
            write_json_error(stream, request, status::SERVER_ERROR, "delete failed").await
        }
    }
}

/// Session check shared by the authenticated routes.
fn authenticated_user(request: &HttpRequest, ctx: &Arc<ControlContext>) -> Option<i64> {
    let session_id = session::extract_session_id(request)?;
    ctx.sessions.validate_and_extend(&session_id).ok()
}
