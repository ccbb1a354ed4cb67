//! HTTP response writing.
//!
//! Responses are assembled in full and written once. CORS headers are
//! reflected from the request `Origin` so browser clients on another
//! port can talk to the API with credentials.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::request::HttpRequest;

/// Reflected CORS header block for one request.
pub fn cors_headers(request: &HttpRequest) -> String {
    let origin = request.header("origin").unwrap_or("*");
    format!(
        "Access-Control-Allow-Origin: {origin}\r\n\
         Access-Control-Allow-Credentials: true\r\n\
         Access-Control-Allow-Headers: Content-Type, Authorization, Cookie\r\n\
         Access-Control-Allow-Methods: GET, POST, DELETE, OPTIONS\r\n"
    )
}

pub async fn write_response<S>(
    stream: &mut S,
    status_line: &str,
    extra_headers: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n{extra_headers}\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

pub async fn write_json<S, T>(
    stream: &mut S,
    request: &HttpRequest,
    status_line: &str,
    body: &T,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    write_response(
        stream,
        status_line,
        &cors_headers(request),
        "application/json",
        &body,
    )
    .await
}

/// `{"error": message}` with the given status line.
pub async fn write_json_error<S>(
    stream: &mut S,
    request: &HttpRequest,
    status_line: &str,
    message: &str,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_json(
        stream,
        request,
        status_line,
        &serde_json::json!({ "error": message }),
    )
    .await
}

/// Empty 204 answer for CORS preflight.
pub async fn write_preflight<S>(stream: &mut S, request: &HttpRequest) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n{}\r\n",
        cors_headers(request)
    );
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await
}

pub mod status {
    pub const OK: &str = "HTTP/1.1 200 OK";
    pub const CREATED: &str = "HTTP/1.1 201 Created";
    pub const BAD_REQUEST: &str = "HTTP/1.1 400 Bad Request";
    pub const UNAUTHORIZED: &str = "HTTP/1.1 401 Unauthorized";
    pub const NOT_FOUND: &str = "HTTP/1.1 404 Not Found";
    pub const CONFLICT: &str = "HTTP/1.1 409 Conflict";
    pub const PAYLOAD_TOO_LARGE: &str = "HTTP/1.1 413 Payload Too Large";
    pub const SERVER_ERROR: &str = "HTTP/1.1 500 Internal Server Error";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_origin(origin: Option<&str>) -> HttpRequest {
        let raw = match origin {
            Some(o) => format!("GET / HTTP/1.1\r\nOrigin: {o}\r\n\r\n"),
            None => "GET / HTTP/1.1\r\n\r\n".to_owned(),
        };
        HttpRequest::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn origin_is_reflected_with_wildcard_fallback() {
        let with = cors_headers(&request_with_origin(Some("http://localhost:3000")));
        assert!(with.contains("Access-Control-Allow-Origin: http://localhost:3000\r\n"));
        let without = cors_headers(&request_with_origin(None));
        assert!(without.contains("Access-Control-Allow-Origin: *\r\n"));
    }

    #[tokio::test]
    async fn json_response_carries_length_and_cors() {
        let req = request_with_origin(Some("http://app"));
        let mut out = Vec::new();
        write_json(&mut out, &req, status::OK, &serde_json::json!({"x": 1}))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: http://app\r\n"));
        assert!(text.ends_with("{\"x\":1}"));
    }
}
