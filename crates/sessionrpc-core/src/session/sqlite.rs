//! SQLite-backed durable session store.

use super::record::SessionRecord;
use super::store::{SessionStore, SessionStoreConfig};
use crate::config::SessionConfig;
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// SQLite session store.
///
/// Each row holds one JSON-encoded [`SessionRecord`] and an expiry timestamp
/// that every write pushes `max_age` into the future. Thread-safe via an
/// internal mutex on the connection.
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
    config: SessionStoreConfig,
}

impl SqliteSessionStore {
    /// Open (or create) a store at the given database path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, SessionStoreConfig::default())
    }

    pub fn with_config(db_path: impl AsRef<Path>, config: SessionStoreConfig) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RpcError::Store {
                    message: format!(
                        "Failed to create session directory {}: {}",
                        parent.display(),
                        e
                    ),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| RpcError::Database {
            message: format!("Failed to open session database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA synchronous=NORMAL;\n\
             PRAGMA busy_timeout={};",
            SessionConfig::SQLITE_BUSY_TIMEOUT_MS
        ))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_expires
                ON sessions(expires_at);
            "#,
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RpcError::Database {
            message: "Failed to acquire session database lock".to_string(),
            source: None,
        })
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn parse_record(id: &str, raw: &str) -> Result<SessionRecord> {
        serde_json::from_str(raw).map_err(|e| RpcError::Store {
            message: format!("Corrupt session record {}: {}", id, e),
        })
    }

    /// Delete expired rows. Returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![Self::now_millis()],
        )?;
        if removed > 0 {
            debug!("Pruned {} expired sessions", removed);
        }
        Ok(removed)
    }

    /// Number of unexpired sessions.
    pub fn len(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE expires_at > ?1",
            params![Self::now_millis()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let raw: Option<String> = {
            let conn = self.lock_conn()?;
            conn.query_row(
                "SELECT record FROM sessions WHERE id = ?1 AND expires_at > ?2",
                params![id, Self::now_millis()],
                |row| row.get(0),
            )
            .optional()?
        };
        raw.map(|raw| Self::parse_record(id, &raw)).transpose()
    }

    async fn set(&self, id: &str, record: SessionRecord) -> Result<()> {
        let raw = serde_json::to_string(&record)?;
        let now = Self::now_millis();
        let max_age = i64::try_from(self.config.effective_max_age().as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(max_age);

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sessions (id, record, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
            params![id, raw, now, expires_at],
        )?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn can_enumerate(&self) -> bool {
        true
    }

    async fn all(&self) -> Result<HashMap<String, SessionRecord>> {
        let rows: Vec<(String, String)> = {
            let conn = self.lock_conn()?;
            let mut stmt =
                conn.prepare("SELECT id, record FROM sessions WHERE expires_at > ?1")?;
            let rows = stmt
                .query_map(params![Self::now_millis()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(id, raw)| {
                let record = Self::parse_record(&id, &raw)?;
                Ok((id, record))
            })
            .collect()
    }
}
