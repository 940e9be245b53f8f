//! Conversation persistence
//!
//! Every successful generation is recorded as a conversation. Records are
//! append-only; the single mutation is the consumed flag the retrain loop
//! flips after a confirmed successful training run. Counting and fetching
//! unconsumed rows read the same underlying table, so a snapshot taken by
//! the retrain loop stays consistent with the count that triggered it.

pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use sqlite::SqliteConversationStore;

/// One persisted chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub ai_response: String,
    pub model_id: String,
    pub session_id: Option<String>,
    /// Whether a completed retrain cycle has already consumed this record
    pub used_for_training: bool,
}

/// Fields of a conversation about to be appended.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub user_message: String,
    pub ai_response: String,
    pub model_id: String,
    pub session_id: Option<String>,
}

/// Aggregate conversation counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total: u64,
    pub pending_training: u64,
}

/// Storage backend for chat conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one conversation; returns the assigned record id.
    async fn append(&self, conversation: NewConversation) -> Result<i64>;

    /// Number of records not yet consumed by a retrain cycle.
    async fn count_unconsumed(&self) -> Result<u64>;

    /// Up to `limit` unconsumed records, most recent first.
    async fn fetch_unconsumed(&self, limit: usize) -> Result<Vec<ConversationRecord>>;

    /// Flip the consumed flag for exactly the given record ids.
    async fn mark_consumed(&self, ids: &[i64]) -> Result<()>;

    /// Totals for the stats surface.
    async fn stats(&self) -> Result<ConversationStats>;
}

/// In-memory store for tests and development.
pub struct InMemoryConversationStore {
    records: Arc<RwLock<Vec<ConversationRecord>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, conversation: NewConversation) -> Result<i64> {
        let mut records = self.records.write();
        let id = records.len() as i64 + 1;
        records.push(ConversationRecord {
            id,
            timestamp: Utc::now(),
            user_message: conversation.user_message,
            ai_response: conversation.ai_response,
            model_id: conversation.model_id,
            session_id: conversation.session_id,
            used_for_training: false,
        });
        Ok(id)
    }

    async fn count_unconsumed(&self) -> Result<u64> {
        let records = self.records.read();
        Ok(records.iter().filter(|r| !r.used_for_training).count() as u64)
    }

    async fn fetch_unconsumed(&self, limit: usize) -> Result<Vec<ConversationRecord>> {
        let records = self.records.read();
        let mut unconsumed: Vec<ConversationRecord> = records
            .iter()
            .filter(|r| !r.used_for_training)
            .cloned()
            .collect();
        unconsumed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        unconsumed.truncate(limit);
        Ok(unconsumed)
    }

    async fn mark_consumed(&self, ids: &[i64]) -> Result<()> {
        let mut records = self.records.write();
        for record in records.iter_mut() {
            if ids.contains(&record.id) {
                record.used_for_training = true;
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<ConversationStats> {
        let records = self.records.read();
        let total = records.len() as u64;
        let pending_training = records.iter().filter(|r| !r.used_for_training).count() as u64;
        Ok(ConversationStats {
            total,
            pending_training,
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
            session_id: None,
        }
    }

    #[tokio::test]
    async fn append_and_count() {
        let store = InMemoryConversationStore::new();
        store.append(conversation("a")).await.unwrap();
        store.append(conversation("b")).await.unwrap();
        assert_eq!(store.count_unconsumed().await.unwrap(), 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending_training, 2);
    }

    #[tokio::test]
    async fn mark_consumed_flips_only_given_ids() {
        let store = InMemoryConversationStore::new();
        let a = store.append(conversation("a")).await.unwrap();
        let _b = store.append(conversation("b")).await.unwrap();
        let c = store.append(conversation("c")).await.unwrap();

        store.mark_consumed(&[a, c]).await.unwrap();
        assert_eq!(store.count_unconsumed().await.unwrap(), 1);
        let remaining = store.fetch_unconsumed(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_message, "b");
    }

    #[tokio::test]
    async fn fetch_unconsumed_is_most_recent_first_and_limited() {
        let store = InMemoryConversationStore::new();
        for i in 0..5 {
            store.append(conversation(&format!("m{i}"))).await.unwrap();
        }
        let fetched = store.fetch_unconsumed(3).await.unwrap();
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched[0].user_message, "m4");
        assert_eq!(fetched[2].user_message, "m2");
    }
}
