//! Minimal HTTP/1.1 request head parsing.
//!
//! Only what the upgrade path and the fixed route table need: request
//! line plus case-insensitive headers. The head is capped at 8 KiB;
//! anything read past the blank line is returned as the body prefix for
//! the dispatcher.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Cap on the request head (request line + headers + blank line).
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("connection closed before the header terminator")]
    UnexpectedEof,
    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,
    #[error("malformed request line")]
    BadRequestLine,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    pub query: String,
    pub version: String,
    /// Names lower-cased at parse time; values trimmed.
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Parse a complete head (everything up to and including CRLFCRLF).
    pub fn parse(head: &[u8]) -> Result<Self, RequestError> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split("\r\n");
        let request_line = lines.next().ok_or(RequestError::BadRequestLine)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(RequestError::BadRequestLine)?.to_owned();
        let target = parts.next().ok_or(RequestError::BadRequestLine)?;
        let version = parts.next().unwrap_or("HTTP/1.0").to_owned();

        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_owned(), q.to_owned()),
            None => (target.to_owned(), String::new()),
        };

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }

        Ok(Self {
            method,
            path,
            query,
            version,
            headers,
        })
    }

    /// First header with this (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// True when `name`'s value contains `token` in its comma-separated
    /// list, case-insensitively (`Connection: keep-alive, Upgrade`).
    pub fn header_contains_token(&self, name: &str, token: &str) -> bool {
        self.header(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// Read from `stream` until the CRLFCRLF terminator, enforcing the head
/// cap. Returns the head (terminator included) and any extra bytes that
/// arrived with it.
pub async fn read_head<S>(stream: &mut S) -> Result<(Vec<u8>, Vec<u8>), RequestError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RequestError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buf) {
            let body_prefix = buf.split_off(end);
            return Ok((buf, body_prefix));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(RequestError::HeadTooLarge);
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}
