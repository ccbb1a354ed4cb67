//! Typed WebSocket client for exercising the control plane.
//!
//! Wraps `tokio-tungstenite` so integration tests speak the same
//! command/event unions as the server. Binary media frames surface
//! separately from text events because both arrive on one socket.

use futures_util::{SinkExt, StreamExt};
use ott_protocol::{ClientCommand, ServerEvent};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type ClientError = Box<dyn std::error::Error + Send + Sync>;

pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Connect with a session id in the `Authorization` header, which the
    /// server validates once at upgrade time.
    pub async fn connect_with_session(url: &str, session_id: &str) -> Result<Self, ClientError> {
        use tokio_tungstenite::tungstenite::handshake::client::generate_key;
        let uri: tokio_tungstenite::tungstenite::http::Uri = url.parse()?;
        let host = uri.host().unwrap_or("localhost").to_owned();
        let host_header = match uri.port_u16() {
            Some(p) => format!("{host}:{p}"),
            None => host,
        };
        let request = Request::builder()
            .uri(url)
            .header("Host", host_header)
            .header("Authorization", format!("Bearer {session_id}"))
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_command(&mut self, cmd: &ClientCommand) -> Result<(), ClientError> {
        let json = serde_json::to_string(cmd)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.write.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), ClientError> {
        self.write.send(Message::Binary(data.into())).await?;
        Ok(())
    }

    /// Next text frame parsed as a server event; pings/pongs are skipped,
    /// binary frames are an error here.
    pub async fn recv_event(&mut self) -> Result<ServerEvent, ClientError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(serde_json::from_str(&text)?);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Binary(data))) => {
                    return Err(format!("expected text event, got {} binary bytes", data.len()).into());
                }
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Next binary frame; text frames encountered on the way are an error
    /// so media-ordering bugs fail loudly.
    pub async fn recv_binary(&mut self) -> Result<Vec<u8>, ClientError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Text(text))) => {
                    return Err(format!("expected binary frame, got text: {text}").into());
                }
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
