//! # Work Queue Abstraction
//!
//! At-least-once delivery queues with a receive budget. Every entry carries a
//! receive count maintained by the queue itself; once an entry has been
//! received `max_receive_count` times, the next receive moves it to the
//! queue's dead-letter queue instead of handing it to a consumer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::errors::{MessagingError, MessagingResult};

pub type QueueEntryId = i64;

/// One entry as handed to a consumer or held in a dead-letter queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub payload: Value,
    /// Number of times this entry has been handed to a consumer
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Deserialize the payload into a typed message
    pub fn decode<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            MessagingError::message_deserialization(format!("entry {}: {e}", self.id))
        })
    }
}

/// Result of one receive call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiveBatch {
    /// Entries now claimed by the caller for the visibility timeout
    pub entries: Vec<QueueEntry>,
    /// Entries that exceeded the receive budget and were moved to the dead-letter queue
    pub dead_lettered: Vec<QueueEntry>,
}

impl ReceiveBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.dead_lettered.is_empty()
    }
}

/// Per-queue delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    /// Receive budget before dead-lettering; `None` disables dead-lettering
    pub max_receive_count: Option<u32>,
    /// How long a received entry stays hidden from other consumers
    pub visibility_timeout: Duration,
    /// Name of the dead-letter queue, derived from `name` when absent
    pub dead_letter_name: Option<String>,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_receive_count: None,
            visibility_timeout: Duration::from_secs(30),
            dead_letter_name: None,
        }
    }

    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = Some(count);
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_dead_letter_name(mut self, name: impl Into<String>) -> Self {
        self.dead_letter_name = Some(name.into());
        self
    }

    pub fn dead_letter_name(&self) -> String {
        self.dead_letter_name
            .clone()
            .unwrap_or_else(|| format!("{}_dlq", self.name))
    }

    /// Whether an entry already received `receive_count` times must be dead-lettered
    pub fn exceeds_budget(&self, receive_count: u32) -> bool {
        self.max_receive_count
            .is_some_and(|max| receive_count >= max)
    }
}

/// Queue statistics for observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub queue_name: String,
    pub message_count: i64,
    pub in_flight_count: Option<i64>,
    pub dead_letter_count: i64,
    pub oldest_message_age_seconds: Option<i64>,
}

/// At-least-once work queue with a dead-letter operational interface
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn settings(&self) -> &QueueSettings;

    fn queue_name(&self) -> &str {
        &self.settings().name
    }

    /// Enqueue a payload, optionally hidden for `delay`
    async fn send(&self, payload: Value, delay: Option<Duration>) -> MessagingResult<QueueEntryId>;

    /// Claim up to `limit` visible entries, dead-lettering any over budget
    async fn receive(&self, limit: usize) -> MessagingResult<ReceiveBatch>;

    /// Remove a processed entry
    async fn ack(&self, entry_id: QueueEntryId) -> MessagingResult<()>;

    /// Make a claimed entry visible again immediately
    async fn release(&self, entry_id: QueueEntryId) -> MessagingResult<()>;

    async fn metrics(&self) -> MessagingResult<QueueMetrics>;

    /// Inspect the dead-letter queue
    async fn dead_letters(&self) -> MessagingResult<Vec<QueueEntry>>;

    /// Move a dead letter back onto this queue with a fresh receive count
    async fn replay_dead_letter(&self, entry_id: QueueEntryId) -> MessagingResult<QueueEntryId>;

    /// Discard a dead letter after out-of-band reconciliation
    async fn delete_dead_letter(&self, entry_id: QueueEntryId) -> MessagingResult<()>;

    /// Backend name for diagnostics
    fn queue_type(&self) -> &'static str;
}

/// Serialize and enqueue a typed message
pub async fn send_json<T: Serialize + Sync>(
    queue: &dyn WorkQueue,
    message: &T,
    delay: Option<Duration>,
) -> MessagingResult<QueueEntryId> {
    let payload = serde_json::to_value(message)?;
    queue.send(payload, delay).await
}
