#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tg_relaybot::db::{DedupStore, StoreError};
use tg_relaybot::model::{
    AuthorKind, CanonicalMessage, Classification, DedupRecord, EventKind, NotificationPreference,
};
use tg_relaybot::queue::QueueSettings;
use tg_relaybot::telegram::{ChatSender, Destination, RenderedMessage, SendError};
use tokio::time::{Duration, Instant};

pub fn message(id: &str, author_kind: AuthorKind, event_kind: EventKind, body: &str) -> CanonicalMessage {
    CanonicalMessage {
        id: id.to_string(),
        conversation_id: Some(format!("conv-{id}")),
        event_kind,
        author_kind,
        author_id: Some("author-1".into()),
        author_name: "Ada".into(),
        author_contact: Some("ada@example.com".into()),
        body: body.to_string(),
        created_at: Utc::now(),
    }
}

pub fn reply(id: &str) -> CanonicalMessage {
    message(id, AuthorKind::PrimaryUser, EventKind::ConversationReply, &format!("body of {id}"))
}

pub fn destination() -> Destination {
    Destination {
        group_id: -100,
        thread_id: None,
    }
}

pub fn fast_settings() -> QueueSettings {
    QueueSettings {
        max_retries: 3,
        inter_message_delay: Duration::ZERO,
        tick_interval: Duration::from_millis(10),
    }
}

pub fn rate_limited(secs: u32) -> SendError {
    SendError::Api {
        code: 429,
        description: format!("Too Many Requests: retry after {secs}"),
        retry_after: Some(secs),
    }
}

pub fn transient() -> SendError {
    SendError::Transport("connection reset by peer".into())
}

pub fn format_rejected() -> SendError {
    SendError::Api {
        code: 400,
        description: "Bad Request: can't parse entities: unexpected end tag".into(),
        retry_after: None,
    }
}

#[derive(Debug, Clone)]
pub struct SendCall {
    pub at: Instant,
    pub text: String,
    pub link: Option<String>,
}

/// Records every send and answers from a scripted list (then `Ok`).
#[derive(Clone, Default)]
pub struct RecordingSender {
    responses: Arc<Mutex<VecDeque<Result<(), SendError>>>>,
    calls: Arc<Mutex<Vec<SendCall>>>,
}

impl RecordingSender {
    pub fn with_responses(responses: Vec<Result<(), SendError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.text).collect()
    }
}

#[async_trait]
impl ChatSender for RecordingSender {
    async fn send(&self, _dest: &Destination, message: &RenderedMessage) -> Result<(), SendError> {
        self.calls.lock().unwrap().push(SendCall {
            at: Instant::now(),
            text: message.text.clone(),
            link: message.link.clone(),
        });
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// In-memory dedup store with injectable failures.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, DedupRecord>>>,
    preferences: Arc<Mutex<HashMap<String, NotificationPreference>>>,
    fail_marks: Arc<AtomicU32>,
    fail_lookups: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn fail_next_marks(&self, n: u32) {
        self.fail_marks.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_lookups(&self, n: u32) {
        self.fail_lookups.store(n, Ordering::SeqCst);
    }

    pub fn set_preference(&self, pref: NotificationPreference) {
        self.preferences
            .lock()
            .unwrap()
            .insert(pref.user_id.clone(), pref);
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().unwrap().contains_key(id)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn io_error() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn has_delivered(&self, message_id: &str) -> Result<bool, StoreError> {
        if Self::take_failure(&self.fail_lookups) {
            return Err(Self::io_error());
        }
        Ok(self.contains(message_id))
    }

    async fn mark_delivered(
        &self,
        message_id: &str,
        conversation_id: Option<&str>,
        kind: Classification,
    ) -> Result<(), StoreError> {
        if Self::take_failure(&self.fail_marks) {
            return Err(Self::io_error());
        }
        self.records
            .lock()
            .unwrap()
            .entry(message_id.to_string())
            .or_insert_with(|| DedupRecord {
                message_id: message_id.to_string(),
                sent_at: Utc::now(),
                conversation_id: conversation_id.map(str::to_string),
                notification_kind: kind,
            });
        Ok(())
    }

    async fn sweep_expired(&self, retention: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - retention;
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| r.sent_at >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn recent_records(&self, limit: u32) -> Result<Vec<DedupRecord>, StoreError> {
        let mut records: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn notification_preference(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        Ok(self.preferences.lock().unwrap().get(user_id).cloned())
    }
}
