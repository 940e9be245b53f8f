//! SQLite-backed conversation store

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::{ConversationRecord, ConversationStats, ConversationStore, NewConversation};
use crate::error::{Error, Result};

/// Production conversation store on a local SQLite database.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open (creating if necessary) the database at `path` and ensure the
    /// schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("conversation store ready at {}", path.display());
        Ok(store)
    }

    /// Open an in-process database, used by tests.
    ///
    /// Pinned to a single connection: every pooled connection to
    /// `sqlite::memory:` would otherwise see its own empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                user_message TEXT NOT NULL,
                ai_response TEXT NOT NULL,
                model_id TEXT NOT NULL,
                session_id TEXT,
                used_for_training INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_used_for_training ON conversations(used_for_training)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationRecord> {
        let timestamp: String = row.get("timestamp");
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| Error::internal(format!("bad timestamp in store: {e}")))?
            .with_timezone(&Utc);
        Ok(ConversationRecord {
            id: row.get("id"),
            timestamp,
            user_message: row.get("user_message"),
            ai_response: row.get("ai_response"),
            model_id: row.get("model_id"),
            session_id: row.get("session_id"),
            used_for_training: row.get::<i64, _>("used_for_training") != 0,
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append(&self, conversation: NewConversation) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversations (timestamp, user_message, ai_response, model_id, session_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&conversation.user_message)
        .bind(&conversation.ai_response)
        .bind(&conversation.model_id)
        .bind(&conversation.session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn count_unconsumed(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM conversations WHERE used_for_training = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn fetch_unconsumed(&self, limit: usize) -> Result<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, user_message, ai_response, model_id, session_id, used_for_training
            FROM conversations
            WHERE used_for_training = 0
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn mark_consumed(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE conversations SET used_for_training = 1 WHERE id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<ConversationStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN used_for_training = 0 THEN 1 ELSE 0 END), 0) AS pending
            FROM conversations
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(ConversationStats {
            total: row.get::<i64, _>("total") as u64,
            pending_training: row.get::<i64, _>("pending") as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(user: &str) -> NewConversation {
        NewConversation {
            user_message: user.to_string(),
            ai_response: "reply".to_string(),
            model_id: "advisor".to_string(),
            session_id: Some("s1".to_string()),
        }
    }

    #[tokio::test]
    async fn round_trips_a_conversation() {
        let store = SqliteConversationStore::open_in_memory().await.unwrap();
        let id = store.append(conversation("hello")).await.unwrap();
        assert!(id > 0);

        let fetched = store.fetch_unconsumed(10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].user_message, "hello");
        assert_eq!(fetched[0].session_id.as_deref(), Some("s1"));
        assert!(!fetched[0].used_for_training);
    }

    #[tokio::test]
    async fn mark_consumed_targets_exact_ids() {
        let store = SqliteConversationStore::open_in_memory().await.unwrap();
        let a = store.append(conversation("a")).await.unwrap();
        let b = store.append(conversation("b")).await.unwrap();

        store.mark_consumed(&[a]).await.unwrap();
        assert_eq!(store.count_unconsumed().await.unwrap(), 1);
        let remaining = store.fetch_unconsumed(10).await.unwrap();
        assert_eq!(remaining[0].id, b);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending_training, 1);
    }

    #[tokio::test]
    async fn mark_consumed_with_no_ids_is_a_no_op() {
        let store = SqliteConversationStore::open_in_memory().await.unwrap();
        store.append(conversation("a")).await.unwrap();
        store.mark_consumed(&[]).await.unwrap();
        assert_eq!(store.count_unconsumed().await.unwrap(), 1);
    }
}
