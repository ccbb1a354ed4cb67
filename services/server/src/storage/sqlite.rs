//! SQLite-backed [`Storage`].
//!
//! One connection behind a mutex: SQLite is the single writer, the mutex
//! is the serialization point. WAL keeps readers cheap.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};

use super::{SessionRow, Storage, StorageError, StorageResult, User, Video};

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }
        Self::from_connection(Connection::open(path).map_err(map_err)?)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(map_err)?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(map_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> StorageResult<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn).map_err(map_err)
    }
}

fn map_err(e: rusqlite::Error) -> StorageError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound,
        rusqlite::Error::SqliteFailure(code, msg)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::Conflict(msg.unwrap_or_else(|| "constraint violation".to_owned()))
        }
        other => StorageError::Io(other.to_string()),
    }
}

fn video_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Video> {
    Ok(Video {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        file_path: row.get(3)?,
        thumbnail_path: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        segment_path: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        duration: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
        upload_date: row.get(7)?,
    })
}

const VIDEO_COLUMNS: &str =
    "id, title, description, file_path, thumbnail_path, segment_path, duration, upload_date";

impl Storage for SqliteStorage {
    fn create_user(
        &self,
        username: &str,
        nickname: &str,
        password_hash: &str,
    ) -> StorageResult<i64> {
        if username.is_empty() || password_hash.is_empty() {
            return Err(StorageError::Misuse("empty username or hash".to_owned()));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, nickname, password_hash) VALUES (?1, ?2, ?3)",
                params![username, nickname, password_hash],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn user_by_username(&self, username: &str) -> StorageResult<User> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, nickname, password_hash, created_at
                 FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        nickname: row.get(2)?,
                        password_hash: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
        })
    }

    fn user_by_id(&self, id: i64) -> StorageResult<User> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, nickname, password_hash, created_at
                 FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        nickname: row.get(2)?,
                        password_hash: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
        })
    }

    fn delete_user(&self, id: i64) -> StorageResult<()> {
        let changed =
            self.with_conn(|conn| conn.execute("DELETE FROM users WHERE id = ?1", params![id]))?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn create_video(
        &self,
        title: &str,
        description: &str,
        file_path: &str,
        thumbnail_path: &str,
        duration: i64,
    ) -> StorageResult<i64> {
        if title.is_empty() || file_path.is_empty() {
            return Err(StorageError::Misuse("empty title or file path".to_owned()));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO videos (title, description, file_path, thumbnail_path, duration)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![title, description, file_path, thumbnail_path, duration],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn video_by_id(&self, id: i64) -> StorageResult<Video> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"),
                params![id],
                video_from_row,
            )
        })
    }

    fn recent_videos(&self, limit: u32) -> StorageResult<Vec<Video>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VIDEO_COLUMNS} FROM videos ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], video_from_row)?;
            rows.collect()
        })
    }

    fn update_video_metadata(&self, id: i64, title: &str, description: &str) -> StorageResult<()> {
        if title.is_empty() {
            return Err(StorageError::Misuse("empty title".to_owned()));
        }
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE videos SET title = ?1, description = ?2 WHERE id = ?3",
                params![title, description, id],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn update_video_duration(&self, id: i64, duration: i64) -> StorageResult<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE videos SET duration = ?1 WHERE id = ?2",
                params![duration, id],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn update_video_thumbnail(&self, id: i64, thumbnail_path: &str) -> StorageResult<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE videos SET thumbnail_path = ?1 WHERE id = ?2",
                params![thumbnail_path, id],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn update_segment_path(&self, id: i64, segment_path: &str) -> StorageResult<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE videos SET segment_path = ?1 WHERE id = ?2",
                params![segment_path, id],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn delete_video(&self, id: i64) -> StorageResult<()> {
        let changed =
            self.with_conn(|conn| conn.execute("DELETE FROM videos WHERE id = ?1", params![id]))?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn upsert_watch(&self, user_id: i64, video_id: i64, position: i64) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO watch_history (user_id, video_id, last_position)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, video_id)
                 DO UPDATE SET last_position = ?3, updated_at = datetime('now')",
                params![user_id, video_id, position],
            )?;
            Ok(())
        })
    }

    fn watch_position(&self, user_id: i64, video_id: i64) -> StorageResult<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT last_position FROM watch_history WHERE user_id = ?1 AND video_id = ?2",
                params![user_id, video_id],
                |row| row.get(0),
            )
        })
    }

    fn continue_watching(&self, user_id: i64, limit: u32) -> StorageResult<Vec<(Video, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id, v.title, v.description, v.file_path, v.thumbnail_path,
                        v.segment_path, v.duration, v.upload_date, w.last_position
                 FROM watch_history w JOIN videos v ON w.video_id = v.id
                 WHERE w.user_id = ?1 AND w.last_position > 10
                 ORDER BY w.updated_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit], |row| {
                Ok((video_from_row(row)?, row.get::<_, i64>(8)?))
            })?;
            rows.collect()
        })
    }

    fn delete_watch(&self, user_id: i64, video_id: i64) -> StorageResult<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM watch_history WHERE user_id = ?1 AND video_id = ?2",
                params![user_id, video_id],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn create_session(&self, user_id: i64, session_id: &str, ttl_secs: i64) -> StorageResult<()> {
        if session_id.is_empty() {
            return Err(StorageError::Misuse("empty session id".to_owned()));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (user_id, session_id, expires_at)
                 VALUES (?1, ?2, strftime('%s','now') + ?3)",
                params![user_id, session_id, ttl_secs],
            )?;
            Ok(())
        })
    }

    fn session_by_id(&self, session_id: &str) -> StorageResult<SessionRow> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, session_id, created_at, expires_at
                 FROM sessions
                 WHERE session_id = ?1 AND expires_at > strftime('%s','now')",
                params![session_id],
                |row| {
                    Ok(SessionRow {
                        user_id: row.get(0)?,
                        session_id: row.get(1)?,
                        created_at: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
        })
    }

    fn delete_session(&self, session_id: &str) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
    }

    fn delete_expired_sessions(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE expires_at <= strftime('%s','now')",
                [],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStorage {
        SqliteStorage::open_in_memory().unwrap()
    }

    #[test]
    fn user_roundtrip_and_duplicate_conflict() {
        let s = store();
        let id = s.create_user("alice", "Alice", "hash-a").unwrap();
        let user = s.user_by_username("alice").unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.nickname, "Alice");
        assert_eq!(s.user_by_id(id).unwrap().username, "alice");

        assert!(matches!(
            s.create_user("alice", "Clone", "hash-b"),
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            s.user_by_username("nobody"),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn deleting_a_user_cascades_to_sessions_and_history() {
        let s = store();
        let user = s.create_user("gone", "", "h").unwrap();
        let video = s.create_video("v", "", "v.mp4", "", 0).unwrap();
        s.create_session(user, "sid-1", 3600).unwrap();
        s.upsert_watch(user, video, 50).unwrap();

        s.delete_user(user).unwrap();
        assert!(matches!(s.user_by_id(user), Err(StorageError::NotFound)));
        assert!(matches!(s.session_by_id("sid-1"), Err(StorageError::NotFound)));
        assert!(matches!(
            s.watch_position(user, video),
            Err(StorageError::NotFound)
        ));
        assert!(matches!(s.delete_user(user), Err(StorageError::NotFound)));
    }

    #[test]
    fn empty_username_is_misuse() {
        assert!(matches!(
            store().create_user("", "n", "h"),
            Err(StorageError::Misuse(_))
        ));
    }

    #[test]
    fn videos_list_newest_first_with_cap() {
        let s = store();
        for i in 1..=5 {
            s.create_video(&format!("v{i}"), "", &format!("{i}.mp4"), "", i)
                .unwrap();
        }
        let recent = s.recent_videos(3).unwrap();
        assert_eq!(
            recent.iter().map(|v| v.title.as_str()).collect::<Vec<_>>(),
            ["v5", "v4", "v3"]
        );
    }

    #[test]
    fn video_metadata_and_segment_path_updates() {
        let s = store();
        let id = s.create_video("t", "d", "f.mp4", "", 0).unwrap();
        s.update_video_metadata(id, "t2", "d2").unwrap();
        s.update_segment_path(id, "segments/1").unwrap();
        let v = s.video_by_id(id).unwrap();
        assert_eq!((v.title.as_str(), v.segment_path.as_str()), ("t2", "segments/1"));

        assert!(matches!(
            s.update_video_metadata(999, "x", ""),
            Err(StorageError::NotFound)
        ));
        s.delete_video(id).unwrap();
        assert!(matches!(s.video_by_id(id), Err(StorageError::NotFound)));
    }

    #[test]
    fn watch_history_upserts_and_filters_short_positions() {
        let s = store();
        let user = s.create_user("u", "", "h").unwrap();
        let v1 = s.create_video("a", "", "a.mp4", "", 100).unwrap();
        let v2 = s.create_video("b", "", "b.mp4", "", 100).unwrap();

        s.upsert_watch(user, v1, 5).unwrap();
        s.upsert_watch(user, v1, 42).unwrap();
        assert_eq!(s.watch_position(user, v1).unwrap(), 42);

        // Positions of 10 seconds or less are not "continue watching".
        s.upsert_watch(user, v2, 10).unwrap();
        let cont = s.continue_watching(user, 10).unwrap();
        assert_eq!(cont.len(), 1);
        assert_eq!(cont[0].0.id, v1);
        assert_eq!(cont[0].1, 42);

        s.delete_watch(user, v1).unwrap();
        assert!(matches!(
            s.watch_position(user, v1),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn sessions_expire_and_delete() {
        let s = store();
        let user = s.create_user("u", "", "h").unwrap();

        s.create_session(user, "live-session", 3600).unwrap();
        assert_eq!(s.session_by_id("live-session").unwrap().user_id, user);

        // Already-expired TTL is invisible to lookup and swept by the
        // expiry pass.
        s.create_session(user, "dead-session", -10).unwrap();
        assert!(matches!(
            s.session_by_id("dead-session"),
            Err(StorageError::NotFound)
        ));
        s.delete_expired_sessions().unwrap();
        s.delete_session("live-session").unwrap();
        assert!(matches!(
            s.session_by_id("live-session"),
            Err(StorageError::NotFound)
        ));
    }
}
