//! Server configuration loading.
//!
//! TOML is the config source; every field has a default so an absent or
//! empty file yields a runnable local setup. TLS is the one exception:
//! per deployment convention the certificate and key paths come from the
//! `TLS_CERT_PATH` / `TLS_KEY_PATH` environment variables, and the TCP
//! port serves plaintext when either is unset.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file '{0}': {1}")]
    Io(PathBuf, std::io::Error),
    #[error("parsing config: {0}")]
    Parse(String),
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_ip: String,
    /// TCP port carrying WebSocket upgrades and plain HTTP.
    pub tcp_port: u16,
    /// UDP port of the datagram transport engine.
    pub udp_port: u16,
    /// Concurrent TCP clients; over the cap connections are rejected
    /// with a short plain-text message.
    pub max_clients: usize,
    pub db_path: PathBuf,
    pub video_dir: PathBuf,
    pub segment_dir: PathBuf,
    pub web_root: PathBuf,
    /// Per-connection receive/send timeout in seconds.
    pub io_timeout_secs: u64,
    pub session_ttl_secs: u64,
    /// From `TLS_CERT_PATH`; plaintext when absent.
    pub tls_cert_path: Option<PathBuf>,
    /// From `TLS_KEY_PATH`; plaintext when absent.
    pub tls_key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_owned(),
            tcp_port: 8080,
            udp_port: 9000,
            max_clients: 64,
            db_path: PathBuf::from("data/ottstream.db"),
            video_dir: PathBuf::from("data/videos"),
            segment_dir: PathBuf::from("data/segments"),
            web_root: PathBuf::from("web"),
            io_timeout_secs: 5,
            session_ttl_secs: ott_protocol::limits::SESSION_TTL_SECS,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    server: Option<RawServerSection>,
    storage: Option<RawStorageSection>,
    media: Option<RawMediaSection>,
}

#[derive(Debug, Default, Deserialize)]
struct RawServerSection {
    bind_ip: Option<String>,
    tcp_port: Option<u16>,
    udp_port: Option<u16>,
    max_clients: Option<usize>,
    io_timeout_secs: Option<u64>,
    session_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStorageSection {
    db_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMediaSection {
    video_dir: Option<PathBuf>,
    segment_dir: Option<PathBuf>,
    web_root: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load from `path`; a missing file falls back to defaults, a malformed
/// one is an error.
pub fn load_config_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    let toml_str = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ConfigError::Io(path.to_owned(), e)),
    };
    load_config_from_str(&toml_str)
}

/// Load from the path in `OTTSTREAM_CONFIG`, default `ottstream.toml`.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    let path = std::env::var("OTTSTREAM_CONFIG").unwrap_or_else(|_| "ottstream.toml".to_owned());
    load_config_from_path(Path::new(&path))
}

pub fn load_config_from_str(toml_str: &str) -> Result<ServerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut cfg = ServerConfig::default();

    let server = raw.server.unwrap_or_default();
    if let Some(v) = server.bind_ip {
        cfg.bind_ip = v;
    }
    if let Some(v) = server.tcp_port {
        cfg.tcp_port = v;
    }
    if let Some(v) = server.udp_port {
        cfg.udp_port = v;
    }
    if let Some(v) = server.max_clients {
        cfg.max_clients = v.max(1);
    }
    if let Some(v) = server.io_timeout_secs {
        cfg.io_timeout_secs = v;
    }
    if let Some(v) = server.session_ttl_secs {
        cfg.session_ttl_secs = v;
    }

    let storage = raw.storage.unwrap_or_default();
    if let Some(v) = storage.db_path {
        cfg.db_path = v;
    }

    let media = raw.media.unwrap_or_default();
    if let Some(v) = media.video_dir {
        cfg.video_dir = v;
    }
    if let Some(v) = media.segment_dir {
        cfg.segment_dir = v;
    }
    if let Some(v) = media.web_root {
        cfg.web_root = v;
    }

    cfg.tls_cert_path = std::env::var_os("TLS_CERT_PATH").map(PathBuf::from);
    cfg.tls_key_path = std::env::var_os("TLS_KEY_PATH").map(PathBuf::from);

    Ok(cfg)
}
