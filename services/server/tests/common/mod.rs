//! Shared harness for the server integration tests: an in-process
//! server on ephemeral ports with temp storage and stubbed media tools.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;

use ott_transport::{EngineConfig, TransportEngine};
use server::config::ServerConfig;
use server::media::{MediaError, MediaTools};
use server::session::SessionManager;
use server::state::ControlContext;
use server::storage::{SqliteStorage, Storage};

/// Media tools that never shell out: fixed duration, no-op thumbnail,
/// segmentation refused.
pub struct StubMedia;

impl MediaTools for StubMedia {
    fn probe_duration(&self, _path: &Path) -> Result<f64, MediaError> {
        Ok(12.5)
    }
    fn extract_thumbnail(
        &self,
        _input: &Path,
        _output: &Path,
        _timestamp: &str,
    ) -> Result<(), MediaError> {
        Ok(())
    }
    fn segment(&self, _video_id: i64, _input: &Path) -> Result<PathBuf, MediaError> {
        Err(MediaError::Failed {
            tool: "ffmpeg",
            detail: "stubbed out".to_owned(),
        })
    }
}

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub ctx: Arc<ControlContext>,
    pub shutdown: Arc<Notify>,
    // Keeps the scratch tree alive for the duration of the test.
    pub dir: tempfile::TempDir,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    pub async fn stop(&self) {
        self.shutdown.notify_waiters();
        self.ctx.engine.shutdown().await;
    }
}

pub async fn spawn_server(max_clients: usize) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ServerConfig {
        db_path: dir.path().join("test.db"),
        video_dir: dir.path().join("videos"),
        segment_dir: dir.path().join("segments"),
        web_root: dir.path().join("web"),
        max_clients,
        ..ServerConfig::default()
    };
    std::fs::create_dir_all(&config.video_dir).unwrap();
    std::fs::create_dir_all(&config.segment_dir).unwrap();
    std::fs::create_dir_all(&config.web_root).unwrap();

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&config.db_path).unwrap());
    let engine = TransportEngine::bind(EngineConfig {
        recv_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    })
    .await
    .expect("bind engine");
    engine.start().expect("start engine");

    let sessions = SessionManager::new(Arc::clone(&storage), Duration::from_secs(1800));
    let ctx = Arc::new(ControlContext::new(
        engine,
        storage,
        sessions,
        Arc::new(StubMedia),
        config,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Notify::new());
    let acceptor_ctx = Arc::clone(&ctx);
    let acceptor_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let _ = server::acceptor::run(listener, None, acceptor_ctx, acceptor_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    TestServer {
        addr,
        ctx,
        shutdown,
        dir,
    }
}

/// Create a user and return a live session id.
pub fn seed_user_with_session(server: &TestServer, username: &str, password: &str) -> String {
    let hash = server::auth::hash_password(password).unwrap();
    server
        .ctx
        .storage
        .create_user(username, username, &hash)
        .unwrap();
    server.ctx.sessions.login(username, password).unwrap()
}

/// Insert a video row whose backing file holds `contents`.
pub fn seed_video(server: &TestServer, title: &str, contents: &[u8]) -> i64 {
    let file_name = format!("{title}.mp4");
    std::fs::write(server.ctx.config.video_dir.join(&file_name), contents).unwrap();
    server
        .ctx
        .storage
        .create_video(title, "seeded", &file_name, "", 30)
        .unwrap()
}
