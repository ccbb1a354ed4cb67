//! Static-file fallback for GET requests no route claims.
//!
//! Serves the web root (player page, scripts) plus the `data/` tree for
//! thumbnails. Paths are normalized component-by-component so `..`
//! can never escape the roots.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tracing::debug;

use crate::state::ControlContext;

use super::request::HttpRequest;
use super::response::{cors_headers, status, write_json_error, write_response};

pub async fn serve<S>(
    stream: &mut S,
    request: &HttpRequest,
    ctx: &Arc<ControlContext>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let rel = request.path.trim_start_matches('/');
    let rel = if rel.is_empty() { "index.html" } else { rel };

    let Some(rel) = sanitize(rel) else {
        return write_json_error(stream, request, status::NOT_FOUND, "not found").await;
    };

    // Thumbnails and other generated assets live under data/; everything
    // else comes from the web root.
    let full = if rel.starts_with("data") {
        rel.clone()
    } else {
        ctx.config.web_root.join(&rel)
    };

    match tokio::fs::read(&full).await {
        Ok(body) => {
            debug!(path = %full.display(), bytes = body.len(), "static file served");
            write_response(
                stream,
                status::OK,
                &cors_headers(request),
                content_type(&full),
                &body,
            )
            .await
        }
        Err(_) => write_json_error(stream, request, status::NOT_FOUND, "not found").await,
    }
}

/// Strip the path to plain normal components; any `..`, root or prefix
/// component rejects the request.
fn sanitize(rel: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("m4s") => "video/iso.segment",
        Some("mpd") => "application/dash+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_components_are_rejected() {
        assert_eq!(sanitize("../etc/passwd"), None);
        assert_eq!(sanitize("a/../../b"), None);
        assert_eq!(sanitize("/abs/path"), None);
        assert_eq!(
            sanitize("./player/index.html"),
            Some(PathBuf::from("player/index.html"))
        );
    }

    #[test]
    fn content_types_cover_the_media_set() {
        assert_eq!(content_type(Path::new("a/index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("seg/chunk-00001.m4s")), "video/iso.segment");
        assert_eq!(content_type(Path::new("noext")), "application/octet-stream");
    }
}
