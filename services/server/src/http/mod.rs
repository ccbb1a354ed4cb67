//! Plain-HTTP side of the TCP port.
//!
//! Requests that are not WebSocket upgrades land here: a fixed route
//! table over the auth/upload/admin handlers with a static-file
//! fallback.

pub mod handlers;
pub mod request;
pub mod response;
pub mod static_files;

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::debug;

use crate::state::ControlContext;
use request::HttpRequest;
use response::{status, write_json_error, write_preflight};

/// Cap on JSON bodies; uploads stream and are capped separately.
const MAX_JSON_BODY: usize = 64 * 1024;

/// Route one parsed request. `body_prefix` holds bytes that arrived with
/// the head; the rest of the body is read from `stream` on demand.
pub async fn dispatch<S>(
    stream: &mut S,
    request: &HttpRequest,
    body_prefix: Vec<u8>,
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(method = %request.method, path = %request.path, "http request");

    if request.method == "OPTIONS" {
        return write_preflight(stream, request).await;
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/signup") => {
            let body = read_json_body(stream, request, body_prefix).await?;
            handlers::signup(stream, request, &body, ctx).await
        }
        ("POST", "/login") => {
            let body = read_json_body(stream, request, body_prefix).await?;
            handlers::login(stream, request, &body, ctx).await
        }
        ("POST", "/logout") => handlers::logout(stream, request, ctx).await,
        ("POST", "/upload") => handlers::upload(stream, request, body_prefix, ctx).await,
        ("GET", "/admin/video/list") => handlers::admin_video_list(stream, request, ctx).await,
        ("POST", "/admin/video/update") => {
            let body = read_json_body(stream, request, body_prefix).await?;
            handlers::admin_video_update(stream, request, &body, ctx).await
        }
        ("POST", "/admin/video/delete") => {
            let body = read_json_body(stream, request, body_prefix).await?;
            handlers::admin_video_delete(stream, request, &body, ctx).await
        }
        ("GET", _) => static_files::serve(stream, request, ctx).await,
        _ => write_json_error(stream, request, status::BAD_REQUEST, "no such route").await,
    }
}

/// Read the request body up to `Content-Length`, starting from what
/// already arrived with the head.
async fn read_json_body<S>(
    stream: &mut S,
    request: &HttpRequest,
    mut prefix: Vec<u8>,
) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let declared = request.content_length().min(MAX_JSON_BODY);
    while prefix.len() < declared {
        let mut chunk = vec![0u8; declared - prefix.len()];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        prefix.extend_from_slice(&chunk[..n]);
    }
    prefix.truncate(declared);
    Ok(prefix)
}
