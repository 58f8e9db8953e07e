//! # In-Memory Work Queue
//!
//! Single-process [`WorkQueue`] with visibility timeout semantics, delayed
//! sends and receive-count redrive into an attached dead-letter list. Used by
//! tests and by single-node deployments that do not need durability.
//!
//! Visibility is tracked with `tokio::time::Instant` so tests can drive it
//! with a paused clock.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::errors::{MessagingError, MessagingResult};
use super::queue::{QueueEntry, QueueEntryId, QueueMetrics, QueueSettings, ReceiveBatch, WorkQueue};

/// Furthest a visibility deadline is pushed out; larger delays saturate here
const MAX_HIDDEN_FOR: Duration = Duration::from_secs(86_400 * 365 * 30);

fn visible_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_HIDDEN_FOR)).unwrap_or(now)
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: QueueEntry,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<StoredEntry>,
    dead_letters: Vec<QueueEntry>,
    next_id: QueueEntryId,
}

impl QueueState {
    fn allocate_id(&mut self) -> QueueEntryId {
        self.next_id += 1;
        self.next_id
    }

    fn push(&mut self, payload: Value, visible_at: Instant) -> QueueEntryId {
        let id = self.allocate_id();
        self.entries.push_back(StoredEntry {
            entry: QueueEntry {
                id,
                payload,
                receive_count: 0,
                enqueued_at: Utc::now(),
            },
            visible_at,
        });
        id
    }
}

#[derive(Debug)]
pub struct InMemoryQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Number of entries in the main queue, claimed or not
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn send(&self, payload: Value, delay: Option<Duration>) -> MessagingResult<QueueEntryId> {
        let visible_at = visible_after(Instant::now(), delay.unwrap_or_default());
        let id = self.state.lock().await.push(payload, visible_at);
        debug!(queue = %self.settings.name, entry_id = id, delay_ms = ?delay.map(|d| d.as_millis()), "Entry enqueued");
        Ok(id)
    }

    async fn receive(&self, limit: usize) -> MessagingResult<ReceiveBatch> {
        let now = Instant::now();
        let hidden_until = visible_after(now, self.settings.visibility_timeout);
        let mut state = self.state.lock().await;
        let mut batch = ReceiveBatch::default();

        let pending = std::mem::take(&mut state.entries);
        let mut kept = VecDeque::with_capacity(pending.len());

        for mut stored in pending {
            let visible = stored.visible_at <= now;
            if visible && batch.entries.len() < limit {
                if self.settings.exceeds_budget(stored.entry.receive_count) {
                    batch.dead_lettered.push(stored.entry);
                    continue;
                }
                stored.entry.receive_count += 1;
                stored.visible_at = hidden_until;
                batch.entries.push(stored.entry.clone());
            }
            kept.push_back(stored);
        }

        state.entries = kept;
        if !batch.dead_lettered.is_empty() {
            warn!(
                queue = %self.settings.name,
                dead_letter_queue = %self.settings.dead_letter_name(),
                count = batch.dead_lettered.len(),
                "☠️ Entries exceeded receive budget and were moved to the dead-letter queue"
            );
            state.dead_letters.extend(batch.dead_lettered.iter().cloned());
        }

        Ok(batch)
    }

    async fn ack(&self, entry_id: QueueEntryId) -> MessagingResult<()> {
        let mut state = self.state.lock().await;
        let position = state
            .entries
            .iter()
            .position(|s| s.entry.id == entry_id)
            .ok_or_else(|| MessagingError::entry_not_found(&self.settings.name, entry_id))?;
        state.entries.remove(position);
        Ok(())
    }

    async fn release(&self, entry_id: QueueEntryId) -> MessagingResult<()> {
        let mut state = self.state.lock().await;
        let stored = state
            .entries
            .iter_mut()
            .find(|s| s.entry.id == entry_id)
            .ok_or_else(|| MessagingError::entry_not_found(&self.settings.name, entry_id))?;
        stored.visible_at = Instant::now();
        Ok(())
    }

    async fn metrics(&self) -> MessagingResult<QueueMetrics> {
        let now = Instant::now();
        let state = self.state.lock().await;
        let in_flight = state.entries.iter().filter(|s| s.visible_at > now).count();
        let oldest = state
            .entries
            .iter()
            .map(|s| s.entry.enqueued_at)
            .min()
            .map(|t| (Utc::now() - t).num_seconds());

        Ok(QueueMetrics {
            queue_name: self.settings.name.clone(),
            message_count: state.entries.len() as i64,
            in_flight_count: Some(in_flight as i64),
            dead_letter_count: state.dead_letters.len() as i64,
            oldest_message_age_seconds: oldest,
        })
    }

    async fn dead_letters(&self) -> MessagingResult<Vec<QueueEntry>> {
        Ok(self.state.lock().await.dead_letters.clone())
    }

    async fn replay_dead_letter(&self, entry_id: QueueEntryId) -> MessagingResult<QueueEntryId> {
        let mut state = self.state.lock().await;
        let position = state
            .dead_letters
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| {
                MessagingError::entry_not_found(self.settings.dead_letter_name(), entry_id)
            })?;
        let dead = state.dead_letters.remove(position);
        let new_id = state.push(dead.payload, Instant::now());
        debug!(queue = %self.settings.name, dead_entry_id = entry_id, new_entry_id = new_id, "Dead letter replayed");
        Ok(new_id)
    }

    async fn delete_dead_letter(&self, entry_id: QueueEntryId) -> MessagingResult<()> {
        let mut state = self.state.lock().await;
        let before = state.dead_letters.len();
        state.dead_letters.retain(|e| e.id != entry_id);
        if state.dead_letters.len() == before {
            return Err(MessagingError::entry_not_found(
                self.settings.dead_letter_name(),
                entry_id,
            ));
        }
        Ok(())
    }

    fn queue_type(&self) -> &'static str {
        "in_memory"
    }
}
