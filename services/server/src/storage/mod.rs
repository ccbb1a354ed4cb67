//! Persistent storage behind an abstract, swappable interface.
//!
//! The core talks to user/video/watch/session rows only through the
//! [`Storage`] trait; the bundled implementation is single-writer SQLite.
//! Errors are typed so callers can distinguish absent rows from misuse
//! and real I/O failures.

mod sqlite;

pub use sqlite::SqliteStorage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("row not found")]
    NotFound,
    #[error("misuse: {0}")]
    Misuse(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage io: {0}")]
    Io(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub nickname: String,
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub thumbnail_path: String,
    pub segment_path: String,
    pub duration: i64,
    pub upload_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub user_id: i64,
    pub session_id: String,
    pub created_at: String,
    /// Unix seconds.
    pub expires_at: i64,
}

/// All persistence operations of the server. Implementations must be
/// safe to call from multiple connection tasks concurrently.
pub trait Storage: Send + Sync {
    // Users
    fn create_user(
        &self,
        username: &str,
        nickname: &str,
        password_hash: &str,
    ) -> StorageResult<i64>;
    fn user_by_username(&self, username: &str) -> StorageResult<User>;
    fn user_by_id(&self, id: i64) -> StorageResult<User>;
    fn delete_user(&self, id: i64) -> StorageResult<()>;

    // Videos
    fn create_video(
        &self,
        title: &str,
        description: &str,
        file_path: &str,
        thumbnail_path: &str,
        duration: i64,
    ) -> StorageResult<i64>;
    fn video_by_id(&self, id: i64) -> StorageResult<Video>;
    fn recent_videos(&self, limit: u32) -> StorageResult<Vec<Video>>;
    fn update_video_metadata(&self, id: i64, title: &str, description: &str) -> StorageResult<()>;
    fn update_video_duration(&self, id: i64, duration: i64) -> StorageResult<()>;
    fn update_video_thumbnail(&self, id: i64, thumbnail_path: &str) -> StorageResult<()>;
    fn update_segment_path(&self, id: i64, segment_path: &str) -> StorageResult<()>;
    fn delete_video(&self, id: i64) -> StorageResult<()>;

    // Watch history
    fn upsert_watch(&self, user_id: i64, video_id: i64, position: i64) -> StorageResult<()>;
    fn watch_position(&self, user_id: i64, video_id: i64) -> StorageResult<i64>;
    /// Most recently updated partially-watched videos with their saved
    /// positions, newest first.
    fn continue_watching(&self, user_id: i64, limit: u32) -> StorageResult<Vec<(Video, i64)>>;
    fn delete_watch(&self, user_id: i64, video_id: i64) -> StorageResult<()>;

    // Sessions
    fn create_session(&self, user_id: i64, session_id: &str, ttl_secs: i64) -> StorageResult<()>;
    fn session_by_id(&self, session_id: &str) -> StorageResult<SessionRow>;
    fn delete_session(&self, session_id: &str) -> StorageResult<()>;
    fn delete_expired_sessions(&self) -> StorageResult<()>;
}
