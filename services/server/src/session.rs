//! Login sessions.
//!
//! A session is a 64-hex-char id stored server-side with an expiry.
//! Validation extends the TTL by recreating the row, so an active client
//! never expires mid-use. Clients present the id either as
//! `Authorization: Bearer <id>` or as a `SID` cookie.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::auth;
use crate::http::request::HttpRequest;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unknown or expired session")]
    Unknown,
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn Storage>, ttl: Duration) -> Self {
        Self { storage, ttl }
    }

    /// Verify credentials and mint a fresh session id.
    pub fn login(&self, username: &str, password: &str) -> Result<String, SessionError> {
        let user = match self.storage.user_by_username(username) {
            Ok(user) => user,
            Err(StorageError::NotFound) => return Err(SessionError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        if !auth::verify_password(password, &user.password_hash) {
            return Err(SessionError::InvalidCredentials);
        }
        let session_id = generate_session_id();
        self.storage
            .create_session(user.id, &session_id, self.ttl.as_secs() as i64)?;
        debug!(user_id = user.id, "session created");
        Ok(session_id)
    }

    /// Resolve a session id to its user and push the expiry out by one
    /// TTL. Expired rows are swept opportunistically on every call.
    pub fn validate_and_extend(&self, session_id: &str) -> Result<i64, SessionError> {
        let row = match self.storage.session_by_id(session_id) {
            Ok(row) => row,
            Err(StorageError::NotFound) => return Err(SessionError::Unknown),
            Err(e) => return Err(e.into()),
        };
        self.storage.delete_expired_sessions()?;
        self.storage.delete_session(session_id)?;
        self.storage
            .create_session(row.user_id, session_id, self.ttl.as_secs() as i64)?;
        Ok(row.user_id)
    }

    pub fn logout(&self, session_id: &str) -> Result<(), SessionError> {
        self.storage.delete_session(session_id)?;
        Ok(())
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Pull a session id out of request headers: `Authorization: Bearer`
/// wins over the `SID` cookie.
pub fn extract_session_id(request: &HttpRequest) -> Option<String> {
    if let Some(auth_header) = request.header("authorization") {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.trim().to_owned());
            }
        }
    }
    let cookie = request.header("cookie")?;
    for part in cookie.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("SID=") {
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(SqliteStorage::open_in_memory().unwrap()),
            Duration::from_secs(1800),
        )
    }

    fn request_with_headers(headers: &[(&str, &str)]) -> HttpRequest {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str("\r\n");
        HttpRequest::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn login_validate_logout_cycle() {
        let mgr = manager();
        let hash = crate::auth::hash_password("pw").unwrap();
        let user_id = mgr.storage.create_user("u", "U", &hash).unwrap();

        let sid = mgr.login("u", "pw").unwrap();
        assert_eq!(sid.len(), 64);
        assert_eq!(mgr.validate_and_extend(&sid).unwrap(), user_id);

        mgr.logout(&sid).unwrap();
        assert!(matches!(
            mgr.validate_and_extend(&sid),
            Err(SessionError::Unknown)
        ));
    }

    #[test]
    fn wrong_password_and_unknown_user_are_invalid_credentials() {
        let mgr = manager();
        let hash = crate::auth::hash_password("pw").unwrap();
        mgr.storage.create_user("u", "U", &hash).unwrap();

        assert!(matches!(
            mgr.login("u", "wrong"),
            Err(SessionError::InvalidCredentials)
        ));
        assert!(matches!(
            mgr.login("ghost", "pw"),
            Err(SessionError::InvalidCredentials)
        ));
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let req = request_with_headers(&[
            ("Authorization", "Bearer from-bearer"),
            ("Cookie", "theme=dark; SID=from-cookie"),
        ]);
        assert_eq!(extract_session_id(&req).as_deref(), Some("from-bearer"));
    }

    #[test]
    fn cookie_is_used_when_no_bearer() {
        let req = request_with_headers(&[("Cookie", "a=1; SID=cookie-session; b=2")]);
        assert_eq!(extract_session_id(&req).as_deref(), Some("cookie-session"));
        let req = request_with_headers(&[("Cookie", "a=1")]);
        assert_eq!(extract_session_id(&req), None);
        let req = request_with_headers(&[]);
        assert_eq!(extract_session_id(&req), None);
    }
}
