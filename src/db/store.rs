use async_trait::async_trait;

use super::model::StoreError;
use super::repo::{self, Pool};
use crate::model::{Classification, DedupRecord, NotificationPreference};

/// Persistent record of delivered message ids.
///
/// Each operation is a single-row statement, so implementations need no
/// cross-call transactions.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn has_delivered(&self, message_id: &str) -> Result<bool, StoreError>;

    /// Idempotent: a second call for the same id neither fails nor duplicates.
    async fn mark_delivered(
        &self,
        message_id: &str,
        conversation_id: Option<&str>,
        kind: Classification,
    ) -> Result<(), StoreError>;

    async fn sweep_expired(&self, retention: chrono::Duration) -> Result<u64, StoreError>;

    async fn recent_records(&self, limit: u32) -> Result<Vec<DedupRecord>, StoreError>;

    async fn notification_preference(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteDedupStore {
    pool: Pool,
}

impl SqliteDedupStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn has_delivered(&self, message_id: &str) -> Result<bool, StoreError> {
        repo::has_delivered(&self.pool, message_id).await
    }

    async fn mark_delivered(
        &self,
        message_id: &str,
        conversation_id: Option<&str>,
        kind: Classification,
    ) -> Result<(), StoreError> {
        repo::mark_delivered(&self.pool, message_id, conversation_id, kind).await
    }

    async fn sweep_expired(&self, retention: chrono::Duration) -> Result<u64, StoreError> {
        repo::sweep_expired(&self.pool, retention).await
    }

    async fn recent_records(&self, limit: u32) -> Result<Vec<DedupRecord>, StoreError> {
        repo::recent_records(&self.pool, limit).await
    }

    async fn notification_preference(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        repo::notification_preference(&self.pool, user_id).await
    }
}
