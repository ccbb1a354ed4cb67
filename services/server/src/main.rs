// server binary: wire the transport engine, control context and TCP
// acceptor together and run until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

use ott_transport::{EngineConfig, TransportEngine};
use server::media::FfmpegTools;
use server::session::SessionManager;
use server::state::ControlContext;
use server::storage::{SqliteStorage, Storage};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "server starting");

    let config = match server::config::load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let storage: Arc<dyn Storage> = match SqliteStorage::open(&config.db_path) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            error!(error = %e, db = %config.db_path.display(), "failed to open storage");
            std::process::exit(1);
        }
    };

    let engine = match TransportEngine::bind(EngineConfig {
        port: config.udp_port,
        ..EngineConfig::default()
    })
    .await
    {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, port = config.udp_port, "failed to bind transport engine");
            std::process::exit(1);
        }
    };
    engine.set_state_handler(|connection_id, state, addr| {
        info!(connection_id, %state, %addr, "transport connection state");
    });
    if let Err(e) = engine.start() {
        error!(error = %e, "failed to start transport engine");
        std::process::exit(1);
    }
    info!(port = config.udp_port, "transport engine running");

    let sessions = SessionManager::new(
        Arc::clone(&storage),
        Duration::from_secs(config.session_ttl_secs),
    );
    let media = Arc::new(FfmpegTools::new(config.segment_dir.clone()));
    let ctx = Arc::new(ControlContext::new(
        engine,
        storage,
        sessions,
        media,
        config.clone(),
    ));

    let tls = match server::tls::maybe_tls_acceptor(&config) {
        Ok(tls) => tls,
        Err(e) => {
            error!(error = %e, "failed to set up TLS");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind((config.bind_ip.as_str(), config.tcp_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = config.tcp_port, "failed to bind TCP listener");
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown_signal.notify_waiters();
        }
    });

    if let Err(e) = server::acceptor::run(listener, tls, Arc::clone(&ctx), shutdown).await {
        error!(error = %e, "acceptor failed");
    }

    ctx.engine.shutdown().await;
    info!("server stopped");
}
