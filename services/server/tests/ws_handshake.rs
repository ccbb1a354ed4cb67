//! The RFC6455 opening handshake over a raw TCP socket.
//!
//! Uses a hand-rolled client (no WebSocket library) so the 101 status
//! line, the accept-key vector and the frame bytes themselves are
//! asserted against the spec'd values.

mod common;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Read until the response head terminator.
async fn read_http_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.expect("head byte");
        buf.push(byte[0]);
    }
    String::from_utf8(buf).unwrap()
}

/// Read one server frame (always unmasked, FIN, payload < 126 in these
/// tests).
async fn read_small_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.expect("frame header");
    assert_eq!(header[0] & 0x80, 0x80, "server frames must set FIN");
    assert_eq!(header[1] & 0x80, 0, "server frames must be unmasked");
    let len = (header[1] & 0x7F) as usize;
    let len = if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await.unwrap();
        u16::from_be_bytes(ext) as usize
    } else {
        len
    };
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.expect("frame payload");
    (header[0] & 0x0F, payload)
}

/// Write one masked client frame.
async fn write_masked_frame(stream: &mut TcpStream, opcode: u8, payload: &[u8]) {
    let mask = [0x37, 0xFA, 0x21, 0x3D];
    let mut wire = vec![0x80 | opcode];
    assert!(payload.len() <= 125);
    wire.push(0x80 | payload.len() as u8);
    wire.extend_from_slice(&mask);
    for (i, b) in payload.iter().enumerate() {
        wire.push(b ^ mask[i % 4]);
    }
    stream.write_all(&wire).await.expect("client frame");
}

#[tokio::test]
async fn upgrade_accept_vector_ready_ping_pong_and_close() {
    let server = common::spawn_server(8).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream
        .write_all(
            format!(
                "GET /ws HTTP/1.1\r\n\
                 Host: {}\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Version: 13\r\n\
                 Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                 \r\n",
                server.addr
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let head = read_http_head(&mut stream).await;
    assert!(
        head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
        "unexpected response head: {head}"
    );
    assert!(
        head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"),
        "accept key mismatch: {head}"
    );

    // First frame is the ready event on a text opcode.
    let (opcode, payload) = read_small_frame(&mut stream).await;
    assert_eq!(opcode, 0x1);
    let ready: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(ready["type"], "ready");

    // Masked ping command gets a pong event.
    write_masked_frame(&mut stream, 0x1, br#"{"type":"ping"}"#).await;
    let (opcode, payload) = read_small_frame(&mut stream).await;
    assert_eq!(opcode, 0x1);
    let pong: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["status"], "ok");

    // Protocol-level ping is answered with a pong frame, same payload.
    write_masked_frame(&mut stream, 0x9, b"tick").await;
    let (opcode, payload) = read_small_frame(&mut stream).await;
    assert_eq!(opcode, 0xA);
    assert_eq!(payload, b"tick");

    // Close handshake is honored with an echoed close frame.
    write_masked_frame(&mut stream, 0x8, &[]).await;
    let (opcode, _) = read_small_frame(&mut stream).await;
    assert_eq!(opcode, 0x8);

    server.stop().await;
}

#[tokio::test]
async fn non_upgrade_get_falls_through_to_http() {
    let server = common::spawn_server(8).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream
        .write_all(b"GET /definitely-missing HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let head = read_http_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"), "{head}");

    server.stop().await;
}

#[tokio::test]
async fn bad_version_upgrade_is_not_switched() {
    let server = common::spawn_server(8).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream
        .write_all(
            b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Version: 8\r\nSec-WebSocket-Key: abc\r\n\r\n",
        )
        .await
        .unwrap();
    let head = read_http_head(&mut stream).await;
    assert!(
        !head.starts_with("HTTP/1.1 101"),
        "version 8 must not upgrade: {head}"
    );

    server.stop().await;
}

#[tokio::test]
async fn over_capacity_connection_gets_busy_message() {
    let server = common::spawn_server(1).await;

    // Occupy the single slot with a live WebSocket session.
    let mut first = ott_test_utils::MockWsClient::connect(&server.ws_url())
        .await
        .unwrap();
    let _ready = first.recv_event().await.unwrap();

    let mut second = TcpStream::connect(server.addr).await.unwrap();
    let mut buf = Vec::new();
    second.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"Server busy, try again later\n");

    first.close().await.unwrap();
    server.stop().await;
}
