//! RFC6455 opening handshake.
//!
//! Validation is strict on what matters: method, upgrade/connection
//! tokens, version 13, key presence. The accept key is the standard
//! SHA-1-over-key-plus-GUID construction.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::HttpRequest;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(SHA1(client_key || GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// True when the request is a well-formed WebSocket upgrade. Anything
/// else falls through to the HTTP dispatcher.
pub fn is_upgrade_request(request: &HttpRequest) -> bool {
    request.method.eq_ignore_ascii_case("GET")
        && request
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
        && request.header_contains_token("connection", "Upgrade")
        && request.header("sec-websocket-version") == Some("13")
        && request
            .header("sec-websocket-key")
            .is_some_and(|k| !k.is_empty())
}

/// Write the `101 Switching Protocols` response for a validated upgrade.
pub async fn respond_switching_protocols<S>(
    stream: &mut S,
    request: &HttpRequest,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let key = request.header("sec-websocket-key").unwrap_or_default();
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}
