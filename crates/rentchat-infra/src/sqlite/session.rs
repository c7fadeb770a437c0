//! SQLite implementation of the Local Session Store.
//!
//! Each session is one row keyed by its topic id. The session itself is kept
//! as a JSON document; `unread_count` and `updated_at` are denormalized for
//! inspection with plain SQL.

use chrono::Utc;
use sqlx::Row;

use rentchat_core::store::SessionStore;
use rentchat_types::chat::ChatSession;
use rentchat_types::error::StoreError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SessionStore`.
pub struct SqliteSessionStore {
    pool: DatabasePool,
}

impl SqliteSessionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Open the database at `database_url` and wrap it in a store.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = DatabasePool::new(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

impl SessionStore for SqliteSessionStore {
    /// Rows that fail to decode are skipped with a warning so one corrupt
    /// session never hides the rest.
    async fn get_all_sessions(&self) -> Result<Vec<ChatSession>, StoreError> {
        let rows = sqlx::query("SELECT id, payload FROM chat_sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row
                .try_get("id")
                .map_err(|e| StoreError::Query(e.to_string()))?;
            let payload: String = row
                .try_get("payload")
                .map_err(|e| StoreError::Query(e.to_string()))?;
            match serde_json::from_str::<ChatSession>(&payload) {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    tracing::warn!(session_id = %id, error = %err, "Skipping undecodable chat session row");
                }
            }
        }
        Ok(sessions)
    }

    async fn save_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(session).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO chat_sessions (id, payload, unread_count, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET
                   payload = excluded.payload,
                   unread_count = excluded.unread_count,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&session.id)
        .bind(&payload)
        .bind(i64::from(session.unread_count))
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        tracing::trace!(session_id = %session.id, "Chat session saved");
        Ok(())
    }
}
