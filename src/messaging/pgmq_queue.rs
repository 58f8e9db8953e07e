//! # PGMQ Work Queue
//!
//! [`WorkQueue`] backed by the `pgmq` Postgres extension. The dead-letter
//! queue is a second pgmq queue; entries over the receive budget are moved to
//! it inside one transaction, wrapped in an envelope that keeps the final
//! receive count.
//!
//! pgmq's `read_ct` is incremented by the read itself, so an entry read for
//! the sixth time comes back with `read_ct = 6` and is redriven instead of
//! being handed to the consumer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::errors::{MessagingError, MessagingResult};
use super::queue::{QueueEntry, QueueEntryId, QueueMetrics, QueueSettings, ReceiveBatch, WorkQueue};

/// pgmq prefixes table names, which caps usable queue names well below 63
const MAX_QUEUE_NAME_LEN: usize = 47;

/// Reject names that could not be pgmq queue names; the dead-letter table is
/// read directly, so the name is interpolated into SQL
pub fn validate_queue_name(name: &str) -> MessagingResult<()> {
    if name.is_empty() || name.len() > MAX_QUEUE_NAME_LEN {
        return Err(MessagingError::invalid_queue_name(
            name,
            format!("length must be between 1 and {MAX_QUEUE_NAME_LEN}"),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(MessagingError::invalid_queue_name(
            name,
            "only lowercase letters, digits and underscores are allowed",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeadLetterEnvelope {
    source_entry_id: QueueEntryId,
    receive_count: u32,
    source_enqueued_at: DateTime<Utc>,
    payload: Value,
}

#[derive(Debug, Clone)]
pub struct PgmqQueue {
    pool: PgPool,
    settings: QueueSettings,
    dead_letter_name: String,
}

impl PgmqQueue {
    pub fn new(pool: PgPool, settings: QueueSettings) -> MessagingResult<Self> {
        validate_queue_name(&settings.name)?;
        let dead_letter_name = settings.dead_letter_name();
        validate_queue_name(&dead_letter_name)?;
        Ok(Self {
            pool,
            settings,
            dead_letter_name,
        })
    }

    /// Create the main and dead-letter queues if they do not exist
    #[instrument(skip(self), fields(queue = %self.settings.name))]
    pub async fn ensure_queues(&self) -> MessagingResult<()> {
        for name in [&self.settings.name, &self.dead_letter_name] {
            sqlx::query("SELECT pgmq.create($1)")
                .bind(name)
                .execute(&self.pool)
                .await
                .map_err(|e| MessagingError::queue_operation(name.as_str(), "create", e.to_string()))?;
        }
        info!(dead_letter_queue = %self.dead_letter_name, "📋 Queue ensured");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn visibility_seconds(&self) -> i32 {
        i32::try_from(self.settings.visibility_timeout.as_secs()).unwrap_or(i32::MAX)
    }

    async fn move_to_dead_letters(&self, entry: &QueueEntry) -> MessagingResult<()> {
        let envelope = DeadLetterEnvelope {
            source_entry_id: entry.id,
            receive_count: entry.receive_count,
            source_enqueued_at: entry.enqueued_at,
            payload: entry.payload.clone(),
        };
        let body = serde_json::to_value(&envelope)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pgmq.send($1, $2, 0)")
            .bind(&self.dead_letter_name)
            .bind(&body)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&self.dead_letter_name, "send", e.to_string())
            })?;
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(&self.settings.name)
            .bind(entry.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MessagingError::queue_operation(&self.settings.name, "delete", e.to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn read_dead_letter(&self, entry_id: QueueEntryId) -> MessagingResult<DeadLetterEnvelope> {
        let sql = format!(
            "SELECT message FROM pgmq.q_{} WHERE msg_id = $1",
            self.dead_letter_name
        );
        let body: Option<Value> = sqlx::query_scalar(&sql)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;
        let body = body
            .ok_or_else(|| MessagingError::entry_not_found(&self.dead_letter_name, entry_id))?;
        serde_json::from_value(body)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}

#[async_trait]
impl WorkQueue for PgmqQueue {
    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    #[instrument(skip(self, payload), fields(queue = %self.settings.name))]
    async fn send(&self, payload: Value, delay: Option<Duration>) -> MessagingResult<QueueEntryId> {
        let delay_seconds = delay
            .map(|d| i32::try_from(d.as_secs()).unwrap_or(i32::MAX))
            .unwrap_or(0);

        let id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2, $3)")
            .bind(&self.settings.name)
            .bind(&payload)
            .bind(delay_seconds)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(&self.settings.name, "send", e.to_string()))?;

        debug!(entry_id = id, delay_seconds, "📤 Entry sent");
        Ok(id)
    }

    #[instrument(skip(self), fields(queue = %self.settings.name))]
    async fn receive(&self, limit: usize) -> MessagingResult<ReceiveBatch> {
        let qty = i32::try_from(limit).unwrap_or(i32::MAX);
        let rows = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(&self.settings.name)
        .bind(self.visibility_seconds())
        .bind(qty)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(&self.settings.name, "read", e.to_string()))?;

        let mut batch = ReceiveBatch::default();
        for row in rows {
            let read_ct: i32 = row.try_get("read_ct")?;
            let entry = QueueEntry {
                id: row.try_get("msg_id")?,
                payload: row.try_get("message")?,
                receive_count: u32::try_from(read_ct).unwrap_or(0),
                enqueued_at: row.try_get("enqueued_at")?,
            };

            // this read already counted; the budget applies to prior receives
            let prior = entry.receive_count.saturating_sub(1);
            if self.settings.exceeds_budget(prior) {
                let dead = QueueEntry {
                    receive_count: prior,
                    ..entry
                };
                self.move_to_dead_letters(&dead).await?;
                batch.dead_lettered.push(dead);
            } else {
                batch.entries.push(entry);
            }
        }

        if !batch.dead_lettered.is_empty() {
            warn!(
                dead_letter_queue = %self.dead_letter_name,
                count = batch.dead_lettered.len(),
                "☠️ Entries exceeded receive budget and were moved to the dead-letter queue"
            );
        }
        Ok(batch)
    }

    async fn ack(&self, entry_id: QueueEntryId) -> MessagingResult<()> {
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(&self.settings.name)
            .bind(entry_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(&self.settings.name, "delete", e.to_string()))?;

        if !deleted {
            return Err(MessagingError::entry_not_found(&self.settings.name, entry_id));
        }
        Ok(())
    }

    async fn release(&self, entry_id: QueueEntryId) -> MessagingResult<()> {
        let row = sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, 0)")
            .bind(&self.settings.name)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(&self.settings.name, "set_vt", e.to_string()))?;

        if row.is_none() {
            return Err(MessagingError::entry_not_found(&self.settings.name, entry_id));
        }
        Ok(())
    }

    async fn metrics(&self) -> MessagingResult<QueueMetrics> {
        let row = sqlx::query("SELECT queue_length, oldest_msg_age_sec FROM pgmq.metrics($1)")
            .bind(&self.settings.name)
            .fetch_optional(&self.pool)
            .await?;
        let dead_letter_count: Option<i64> =
            sqlx::query_scalar("SELECT queue_length FROM pgmq.metrics($1)")
                .bind(&self.dead_letter_name)
                .fetch_optional(&self.pool)
                .await?;

        let (message_count, oldest) = match row {
            Some(row) => {
                let length: Option<i64> = row.try_get("queue_length")?;
                let oldest: Option<i32> = row.try_get("oldest_msg_age_sec")?;
                (length.unwrap_or(0), oldest.map(i64::from))
            }
            None => (0, None),
        };

        Ok(QueueMetrics {
            queue_name: self.settings.name.clone(),
            message_count,
            in_flight_count: None,
            dead_letter_count: dead_letter_count.unwrap_or(0),
            oldest_message_age_seconds: oldest,
        })
    }

    async fn dead_letters(&self) -> MessagingResult<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT msg_id, message FROM pgmq.q_{} ORDER BY msg_id",
            self.dead_letter_name
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("msg_id")?;
            let body: Value = row.try_get("message")?;
            let envelope: DeadLetterEnvelope = serde_json::from_value(body)
                .map_err(|e| MessagingError::message_deserialization(e.to_string()))?;
            entries.push(QueueEntry {
                id,
                payload: envelope.payload,
                receive_count: envelope.receive_count,
                enqueued_at: envelope.source_enqueued_at,
            });
        }
        Ok(entries)
    }

    #[instrument(skip(self), fields(queue = %self.settings.name))]
    async fn replay_dead_letter(&self, entry_id: QueueEntryId) -> MessagingResult<QueueEntryId> {
        let envelope = self.read_dead_letter(entry_id).await?;

        let mut tx = self.pool.begin().await?;
        let new_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2, 0)")
            .bind(&self.settings.name)
            .bind(&envelope.payload)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| MessagingError::queue_operation(&self.settings.name, "send", e.to_string()))?;
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(&self.dead_letter_name)
            .bind(entry_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&self.dead_letter_name, "delete", e.to_string())
            })?;
        tx.commit().await?;

        info!(dead_entry_id = entry_id, new_entry_id = new_id, "♻️ Dead letter replayed");
        Ok(new_id)
    }

    async fn delete_dead_letter(&self, entry_id: QueueEntryId) -> MessagingResult<()> {
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(&self.dead_letter_name)
            .bind(entry_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&self.dead_letter_name, "delete", e.to_string())
            })?;

        if !deleted {
            return Err(MessagingError::entry_not_found(&self.dead_letter_name, entry_id));
        }
        Ok(())
    }

    fn queue_type(&self) -> &'static str {
        "pgmq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_validation() {
        assert!(validate_queue_name("courier_retry_queue").is_ok());
        assert!(validate_queue_name("").is_err());
        assert!(validate_queue_name("retry; DROP TABLE x").is_err());
        assert!(validate_queue_name("Retry").is_err());
        assert!(validate_queue_name(&"q".repeat(48)).is_err());
    }
}

/// Needs a Postgres server with the pgmq extension available; `DATABASE_URL`
/// points `sqlx::test` at it and each test gets a fresh database.
#[cfg(all(test, feature = "database-tests"))]
mod database_tests {
    use super::*;
    use serde_json::json;

    async fn retry_queue(pool: PgPool, max_receive_count: u32) -> PgmqQueue {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pgmq")
            .execute(&pool)
            .await
            .unwrap();
        let queue = PgmqQueue::new(
            pool,
            QueueSettings::new("courier_retry_queue")
                .with_max_receive_count(max_receive_count)
                .with_visibility_timeout(Duration::ZERO),
        )
        .unwrap();
        queue.ensure_queues().await.unwrap();
        queue
    }

    #[sqlx::test]
    async fn test_sixth_read_moves_entry_to_dead_letter_queue(pool: PgPool) {
        let queue = retry_queue(pool, 5).await;
        let id = queue.send(json!({"message_id": "M1"}), None).await.unwrap();

        for expected in 1..=5 {
            let batch = queue.receive(1).await.unwrap();
            assert_eq!(batch.entries.len(), 1, "receive {expected}");
            assert_eq!(batch.entries[0].receive_count, expected);
        }

        let batch = queue.receive(1).await.unwrap();
        assert!(batch.entries.is_empty());
        assert_eq!(batch.dead_lettered.len(), 1);
        assert_eq!(batch.dead_lettered[0].id, id);
        assert_eq!(batch.dead_lettered[0].receive_count, 5);
        assert!(queue.receive(1).await.unwrap().is_empty());

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, json!({"message_id": "M1"}));
        assert_eq!(dead[0].receive_count, 5);
    }

    #[sqlx::test]
    async fn test_replay_returns_entry_with_fresh_receive_count(pool: PgPool) {
        let queue = retry_queue(pool, 1).await;
        queue.send(json!({"message_id": "M2"}), None).await.unwrap();
        queue.receive(1).await.unwrap();
        assert_eq!(queue.receive(1).await.unwrap().dead_lettered.len(), 1);

        let dead_id = queue.dead_letters().await.unwrap()[0].id;
        let new_id = queue.replay_dead_letter(dead_id).await.unwrap();
        assert!(queue.dead_letters().await.unwrap().is_empty());

        let batch = queue.receive(1).await.unwrap();
        assert_eq!(batch.entries[0].id, new_id);
        assert_eq!(batch.entries[0].receive_count, 1);
        assert_eq!(batch.entries[0].payload, json!({"message_id": "M2"}));

        assert!(matches!(
            queue.replay_dead_letter(dead_id).await,
            Err(MessagingError::EntryNotFound { .. })
        ));
    }

    #[sqlx::test]
    async fn test_ack_removes_entry(pool: PgPool) {
        let queue = retry_queue(pool, 5).await;
        let id = queue.send(json!({"n": 1}), None).await.unwrap();
        queue.receive(1).await.unwrap();

        queue.ack(id).await.unwrap();
        assert!(queue.receive(1).await.unwrap().is_empty());
        assert!(queue.ack(id).await.is_err());
    }
}
