//! In-memory, strictly ordered delivery queue.
//!
//! Only the head is ever attempted. A head waiting out a rate limit blocks
//! everything behind it, because the destination's limit is global. Drains are
//! single-flight: a trigger that finds a drain in progress returns at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::classify::{classify, Failure};
use crate::config::Delivery;
use crate::db::DedupStore;
use crate::model::{CanonicalMessage, Classification};
use crate::render::{preview, Renderer};
use crate::telegram::{ChatSender, Destination};

const LOG_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_retries: u32,
    pub inter_message_delay: Duration,
    pub tick_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&Delivery::default())
    }
}

impl QueueSettings {
    pub fn from_config(delivery: &Delivery) -> Self {
        Self {
            max_retries: delivery.max_retries,
            inter_message_delay: delivery.inter_message_delay(),
            tick_interval: delivery.tick_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub message: CanonicalMessage,
    pub retry_count: u32,
    /// Not eligible for a send attempt before this instant.
    pub retry_not_before: Option<Instant>,
    pub classification: Classification,
}

impl QueueEntry {
    pub fn new(message: CanonicalMessage) -> Self {
        let classification = message.classification();
        Self {
            message,
            retry_count: 0,
            retry_not_before: None,
            classification,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    AlreadyDelivered,
    AlreadyQueued,
    /// The author's notification preference turns this classification off.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue is empty.
    Idle,
    /// Another drain holds the single-flight guard.
    Busy,
    /// The head is backing off until the given instant.
    Blocked { until: Instant },
    /// The dedup store could not be consulted; the head stays put.
    Stalled,
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<QueueEntry>,
    last_send: Option<Instant>,
}

struct Inner {
    store: Arc<dyn DedupStore>,
    sender: Arc<dyn ChatSender>,
    renderer: Renderer,
    destination: Destination,
    settings: QueueSettings,
    state: Mutex<State>,
    draining: AtomicBool,
    wake: Notify,
}

#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("destination", &self.inner.destination)
            .field("settings", &self.inner.settings)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Holds the single-flight flag for the lifetime of one drain.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum HeadFailure {
    Retrying,
    Dropped,
}

impl DeliveryQueue {
    pub fn new(
        store: Arc<dyn DedupStore>,
        sender: Arc<dyn ChatSender>,
        renderer: Renderer,
        destination: Destination,
        settings: QueueSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sender,
                renderer,
                destination,
                settings,
                state: Mutex::new(State::default()),
                draining: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the pending entries, head first.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.state().entries.iter().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `message` at the tail unless it was already delivered, is already
    /// pending, or its author opted out of this notification class.
    #[instrument(skip_all, fields(message_id = %message.id))]
    pub async fn enqueue(&self, message: CanonicalMessage) -> EnqueueOutcome {
        match self.inner.store.has_delivered(&message.id).await {
            Ok(true) => {
                debug!("already delivered; ignoring");
                return EnqueueOutcome::AlreadyDelivered;
            }
            Ok(false) => {}
            // The head check before sending repeats this lookup.
            Err(err) => warn!(?err, "dedup lookup failed at enqueue; queueing anyway"),
        }

        let entry = QueueEntry::new(message);

        if let Some(author_id) = entry.message.author_id.as_deref() {
            match self.inner.store.notification_preference(author_id).await {
                Ok(Some(pref)) if !pref.allows(entry.classification) => {
                    info!(
                        author_id,
                        classification = entry.classification.as_str(),
                        "notification suppressed by preference"
                    );
                    return EnqueueOutcome::Suppressed;
                }
                Ok(_) => {}
                Err(err) => warn!(?err, author_id, "preference lookup failed; notifying"),
            }
        }

        {
            let mut state = self.state();
            if state
                .entries
                .iter()
                .any(|e| e.message.id == entry.message.id)
            {
                debug!("already queued; ignoring");
                return EnqueueOutcome::AlreadyQueued;
            }
            debug!(
                classification = entry.classification.as_str(),
                depth = state.entries.len() + 1,
                "queued"
            );
            state.entries.push_back(entry);
        }
        self.inner.wake.notify_one();
        EnqueueOutcome::Queued
    }

    /// Send head entries until the queue is empty or the head is blocked.
    pub async fn drain(&self) -> DrainOutcome {
        let Some(_guard) = DrainGuard::acquire(&self.inner.draining) else {
            return DrainOutcome::Busy;
        };

        loop {
            let Some(head) = self.state().entries.front().cloned() else {
                return DrainOutcome::Idle;
            };
            let id = head.message.id.as_str();

            if let Some(until) = head.retry_not_before {
                if until > Instant::now() {
                    debug!(message_id = id, "head is backing off");
                    return DrainOutcome::Blocked { until };
                }
            }

            match self.inner.store.has_delivered(id).await {
                Ok(true) => {
                    debug!(message_id = id, "head already delivered; skipping");
                    self.pop_head(id);
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(?err, message_id = id, "dedup check failed; head stays queued");
                    return DrainOutcome::Stalled;
                }
            }

            self.pace().await;
            let rendered = self.inner.renderer.render(&head.message, head.classification);
            let result = self
                .inner
                .sender
                .send(&self.inner.destination, &rendered)
                .await;
            self.state().last_send = Some(Instant::now());

            let err = match result {
                Ok(()) => {
                    self.confirm(&head).await;
                    continue;
                }
                Err(err) => err,
            };

            match classify(&err) {
                Failure::RateLimited(secs) => {
                    let Some(until) = Instant::now().checked_add(Duration::from_secs(secs)) else {
                        self.fail_head(id, &err.to_string());
                        continue;
                    };
                    if let Some(retry_count) = self.head_mut(id, |e| {
                        e.retry_not_before = Some(until);
                        e.retry_count
                    }) {
                        warn!(
                            message_id = id,
                            retry_after_secs = secs,
                            retry_count,
                            "rate limited; pausing queue"
                        );
                    }
                    return DrainOutcome::Blocked { until };
                }
                Failure::FormatRejected => {
                    self.pop_head(id);
                    error!(
                        ?err,
                        message_id = id,
                        payload = %preview(&rendered.text, LOG_PREVIEW_CHARS),
                        "destination rejected payload; dropping"
                    );
                }
                Failure::TransientFailure => {
                    self.fail_head(id, &err.to_string());
                }
            }
        }
    }

    /// Record a confirmed send. On a store failure the entry stays at the head
    /// and counts a failed attempt: it will be sent again, which may duplicate
    /// the message at the destination.
    async fn confirm(&self, head: &QueueEntry) {
        let id = head.message.id.as_str();
        match self
            .inner
            .store
            .mark_delivered(id, head.message.conversation_id.as_deref(), head.classification)
            .await
        {
            Ok(()) => {
                self.pop_head(id);
                info!(
                    message_id = id,
                    conversation_id = head.message.conversation_id.as_deref(),
                    classification = head.classification.as_str(),
                    "delivered"
                );
            }
            Err(err) => {
                error!(
                    ?err,
                    message_id = id,
                    "sent but not recorded; will resend and may duplicate"
                );
                self.fail_head(id, "dedup record write failed");
            }
        }
    }

    fn fail_head(&self, id: &str, reason: &str) {
        let max = self.inner.settings.max_retries;
        let outcome = {
            let mut state = self.state();
            match state.entries.front_mut() {
                Some(e) if e.message.id == id => {
                    e.retry_count += 1;
                    let count = e.retry_count;
                    if count >= max {
                        state.entries.pop_front();
                        Some((HeadFailure::Dropped, count))
                    } else {
                        Some((HeadFailure::Retrying, count))
                    }
                }
                _ => None,
            }
        };
        match outcome {
            Some((HeadFailure::Dropped, count)) => error!(
                message_id = id,
                retry_count = count,
                reason,
                "retries exhausted; dropping"
            ),
            Some((HeadFailure::Retrying, count)) => warn!(
                message_id = id,
                retry_count = count,
                max_retries = max,
                reason,
                "send failed; will retry"
            ),
            None => {}
        }
    }

    fn pop_head(&self, id: &str) {
        let mut state = self.state();
        if state.entries.front().is_some_and(|e| e.message.id == id) {
            state.entries.pop_front();
        }
    }

    fn head_mut<T>(&self, id: &str, f: impl FnOnce(&mut QueueEntry) -> T) -> Option<T> {
        let mut state = self.state();
        state
            .entries
            .front_mut()
            .filter(|e| e.message.id == id)
            .map(f)
    }

    /// Wait out the inter-message delay since the previous send attempt.
    async fn pace(&self) {
        let last = self.state().last_send;
        if let Some(last) = last {
            tokio::time::sleep_until(last + self.inner.settings.inter_message_delay).await;
        }
    }

    /// Drive drains from the tick timer, enqueue notifications and backoff
    /// wake-ups until `shutdown` fires. Pending entries are abandoned on exit.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.inner.settings.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut wake_at: Option<Instant> = None;

        info!(
            chat_id = self.inner.destination.group_id,
            "delivery queue started"
        );
        loop {
            let backoff = async {
                match wake_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
                _ = self.inner.wake.notified() => {}
                _ = backoff => {}
            }

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.drain() => outcome,
            };
            wake_at = match outcome {
                DrainOutcome::Blocked { until } => Some(until),
                _ => None,
            };
        }

        let abandoned = self.len();
        if abandoned > 0 {
            warn!(abandoned, "delivery queue stopped with pending entries");
        } else {
            info!("delivery queue stopped");
        }
    }
}
