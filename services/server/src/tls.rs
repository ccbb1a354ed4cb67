//! Optional TLS wrapping of the TCP port.
//!
//! Certificate and key are PEM files named by `TLS_CERT_PATH` /
//! `TLS_KEY_PATH`; when both load, every accepted connection runs the
//! TLS handshake before entering the worker.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;

use crate::config::ServerConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("reading {0}: {1}")]
    Io(String, std::io::Error),
    #[error("no certificates in {0}")]
    NoCertificates(String),
    #[error("no private key in {0}")]
    NoPrivateKey(String),
    #[error("tls setup: {0}")]
    Rustls(#[from] rustls::Error),
}

pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let open = |path: &Path| {
        File::open(path).map_err(|e| TlsError::Io(path.display().to_string(), e))
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(open(cert_path)?))
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::Io(cert_path.display().to_string(), e))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.display().to_string()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(open(key_path)?))
        .map_err(|e| TlsError::Io(key_path.display().to_string(), e))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.display().to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the acceptor when both env-provided paths are configured;
/// plaintext otherwise.
pub fn maybe_tls_acceptor(config: &ServerConfig) -> Result<Option<TlsAcceptor>, TlsError> {
    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => Ok(Some(load_tls_acceptor(cert, key)?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_paths_mean_plaintext() {
        let config = ServerConfig::default();
        assert!(maybe_tls_acceptor(&config).unwrap().is_none());
    }

    #[test]
    fn missing_files_error_out() {
        let mut config = ServerConfig::default();
        config.tls_cert_path = Some("/nonexistent/cert.pem".into());
        config.tls_key_path = Some("/nonexistent/key.pem".into());
        assert!(maybe_tls_acceptor(&config).is_err());
    }
}
