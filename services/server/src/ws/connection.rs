//! Per-connection worker.
//!
//! Every accepted TCP (or TLS) stream lands here. The head is read once;
//! a valid upgrade enters the WebSocket command loop, anything else goes
//! to the HTTP dispatcher. The session id, when present, is validated
//! and extended exactly once at connect time and the resolved user id is
//! cached for the life of the connection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use ott_protocol::{ServerEvent, status};

use crate::http;
use crate::http::request::HttpRequest;
use crate::session;
use crate::state::ControlContext;

use super::commands;
use super::frame::{Frame, FrameError, OpCode, read_frame, write_frame};
use super::handshake;

/// Drive one accepted stream to completion.
pub async fn handle_connection<S>(mut stream: S, ctx: Arc<ControlContext>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_timeout = Duration::from_secs(ctx.config.io_timeout_secs);

    let head = timeout(io_timeout, http::request::read_head(&mut stream)).await;
    let (head, body_prefix) = match head {
        Ok(Ok(parts)) => parts,
        Ok(Err(e)) => {
            debug!(error = %e, "request head rejected");
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await;
            return Ok(());
        }
        Err(_) => return Ok(()),
    };
    let request = match HttpRequest::parse(&head) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "unparseable request");
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await;
            return Ok(());
        }
    };

    if !handshake::is_upgrade_request(&request) {
        return http::dispatch(&mut stream, &request, body_prefix, &ctx).await;
    }

    // Optional session: a bad or absent id degrades to anonymous.
    let user_id = session::extract_session_id(&request)
        .and_then(|sid| ctx.sessions.validate_and_extend(&sid).ok());

    handshake::respond_switching_protocols(&mut stream, &request).await?;
    commands::send_event(
        &mut stream,
        &ServerEvent::Ready {
            status: status::OK.to_owned(),
            message: "websocket-ready".to_owned(),
        },
    )
    .await?;

    run_command_loop(&mut stream, &ctx, user_id, io_timeout).await
}

async fn run_command_loop<S>(
    stream: &mut S,
    ctx: &Arc<ControlContext>,
    user_id: Option<i64>,
    io_timeout: Duration,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = match timeout(io_timeout, read_frame(stream)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(FrameError::Io(e))) => {
                trace!(error = %e, "websocket read ended");
                return Ok(());
            }
            Ok(Err(e)) => {
                debug!(error = %e, "fatal frame error");
                return Ok(());
            }
            Err(_) => {
                trace!("websocket receive timeout");
                return Ok(());
            }
        };

        match frame.opcode {
            OpCode::Text => {
                commands::handle_text(stream, ctx, &frame.payload, user_id).await?;
            }
            // Reserved for streaming upload; echoed for now. A bare
            // continuation echoes as text.
            OpCode::Binary => write_frame(stream, OpCode::Binary, &frame.payload).await?,
            OpCode::Continuation => write_frame(stream, OpCode::Text, &frame.payload).await?,
            OpCode::Close => {
                let Frame { payload, .. } = frame;
                let _ = write_frame(stream, OpCode::Close, &payload).await;
                return Ok(());
            }
            OpCode::Ping => write_frame(stream, OpCode::Pong, &frame.payload).await?,
            OpCode::Pong => {}
        }
    }
}
