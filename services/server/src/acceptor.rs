//! TCP accept loop and worker lifecycle.
//!
//! One task accepts; each connection runs in its own task tracked by a
//! `JoinSet`. The client cap is a semaphore whose permit lives inside
//! the worker, so the count can never leak. Shutdown stops accepting,
//! then drains the live workers.

use std::io;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::state::ControlContext;
use crate::ws;

const BUSY_MESSAGE: &[u8] = b"Server busy, try again later\n";

/// Accept until `shutdown` fires, then drain workers.
pub async fn run(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    ctx: Arc<ControlContext>,
    shutdown: Arc<Notify>,
) -> io::Result<()> {
    let clients = Arc::new(Semaphore::new(ctx.config.max_clients));
    let mut workers = JoinSet::new();

    info!(
        addr = %listener.local_addr()?,
        tls = tls.is_some(),
        max_clients = ctx.config.max_clients,
        "accepting connections"
    );

    // One persistent future so a notification between loop iterations is
    // not lost.
    let mut stop = Box::pin(shutdown.notified());

    loop {
        tokio::select! {
            () = &mut stop => break,
            accepted = listener.accept() => {
                let (mut tcp, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                // Reap finished workers so the set stays small.
                while workers.try_join_next().is_some() {}

                let Ok(permit) = Arc::clone(&clients).try_acquire_owned() else {
                    debug!(peer = %peer, "client cap reached, rejecting");
                    let _ = tcp.write_all(BUSY_MESSAGE).await;
                    continue;
                };

                let ctx = Arc::clone(&ctx);
                let tls = tls.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    match tls {
                        Some(acceptor) => match acceptor.accept(tcp).await {
                            Ok(stream) => {
                                if let Err(e) = ws::handle_connection(stream, ctx).await {
                                    debug!(peer = %peer, error = %e, "connection ended with error");
                                }
                            }
                            // Plain HTTP on the TLS port and friends:
                            // reject quietly.
                            Err(e) => debug!(peer = %peer, error = %e, "tls accept failed"),
                        },
                        None => {
                            if let Err(e) = ws::handle_connection(tcp, ctx).await {
                                debug!(peer = %peer, error = %e, "connection ended with error");
                            }
                        }
                    }
                });
            }
        }
    }

    info!(live = workers.len(), "draining workers");
    while workers.join_next().await.is_some() {}
    Ok(())
}
