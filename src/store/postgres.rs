//! # Postgres Stores
//!
//! `sqlx`-backed implementations of the message and correlation stores.
//! Conditional state writes are a single `UPDATE ... WHERE state = $expected`,
//! so the database's row lock is the only serialization point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::info;

use super::{
    ConditionalWrite, CorrelationStore, CorrelationWrite, MessageStore, StoreError, StoreResult,
};
use crate::models::{Channel, CorrelationRecord, MessageId, MessageRecord, StateUpdate};
use crate::state_machine::MessageState;

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS courier_messages (
        message_id    TEXT PRIMARY KEY,
        channel       TEXT NOT NULL,
        state         TEXT NOT NULL,
        attempts      INTEGER NOT NULL DEFAULT 0,
        last_updated  TIMESTAMPTZ NOT NULL,
        provider_ref  TEXT,
        sent_via      TEXT,
        dead_lettered BOOLEAN NOT NULL DEFAULT FALSE,
        created_at    TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS courier_correlations (
        provider_message_id TEXT PRIMARY KEY,
        message_id          TEXT NOT NULL,
        channel             TEXT NOT NULL,
        created_at          TIMESTAMPTZ NOT NULL,
        expires_at          TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_courier_correlations_expires_at
        ON courier_correlations (expires_at)
    "#,
];

/// Create the courier tables if they do not exist
pub async fn ensure_schema(pool: &PgPool) -> StoreResult<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::database("ensure_schema", e))?;
    }
    info!("🗄️ Courier store schema ensured");
    Ok(())
}

#[derive(Debug, FromRow)]
struct MessageRow {
    message_id: String,
    channel: String,
    state: String,
    attempts: i32,
    last_updated: DateTime<Utc>,
    provider_ref: Option<String>,
    sent_via: Option<String>,
    dead_lettered: bool,
    created_at: DateTime<Utc>,
}

fn parse_channel(field: &str, value: &str) -> StoreResult<Channel> {
    value.parse().map_err(|_| StoreError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_state(value: &str) -> StoreResult<MessageState> {
    value.parse().map_err(|_| StoreError::InvalidValue {
        field: "state".to_string(),
        value: value.to_string(),
    })
}

impl TryFrom<MessageRow> for MessageRecord {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(MessageRecord {
            message_id: MessageId::from(row.message_id),
            channel: parse_channel("channel", &row.channel)?,
            state: parse_state(&row.state)?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            last_updated: row.last_updated,
            provider_ref: row.provider_ref,
            sent_via: row
                .sent_via
                .as_deref()
                .map(|v| parse_channel("sent_via", v))
                .transpose()?,
            dead_lettered: row.dead_lettered,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_state(&self, message_id: &MessageId) -> StoreResult<Option<MessageState>> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM courier_messages WHERE message_id = $1")
                .bind(message_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::database("current_state", e))?;

        state.as_deref().map(parse_state).transpose()
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create_if_absent(&self, record: MessageRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO courier_messages
                (message_id, channel, state, attempts, last_updated, provider_ref,
                 sent_via, dead_lettered, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(record.message_id.as_str())
        .bind(record.channel.as_str())
        .bind(record.state.as_str())
        .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
        .bind(record.last_updated)
        .bind(record.provider_ref.as_deref())
        .bind(record.sent_via.map(|c| c.as_str()))
        .bind(record.dead_lettered)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("create_if_absent", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, message_id: &MessageId) -> StoreResult<Option<MessageRecord>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM courier_messages WHERE message_id = $1",
        )
        .bind(message_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("get_message", e))?;

        row.map(MessageRecord::try_from).transpose()
    }

    async fn conditional_update(
        &self,
        message_id: &MessageId,
        update: &StateUpdate,
    ) -> StoreResult<ConditionalWrite> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE courier_messages
            SET state = $3,
                last_updated = $4,
                provider_ref = COALESCE($5, provider_ref),
                sent_via = COALESCE($6, sent_via),
                dead_lettered = dead_lettered OR $7
            WHERE message_id = $1 AND state = $2
            RETURNING *
            "#,
        )
        .bind(message_id.as_str())
        .bind(update.expected.as_str())
        .bind(update.to.as_str())
        .bind(update.at)
        .bind(update.provider_ref.as_deref())
        .bind(update.sent_via.map(|c| c.as_str()))
        .bind(update.dead_lettered)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("conditional_update", e))?;

        match row {
            Some(row) => Ok(ConditionalWrite::Applied(MessageRecord::try_from(row)?)),
            None => match self.current_state(message_id).await? {
                Some(actual) => Ok(ConditionalWrite::PreconditionFailed(actual)),
                None => Err(StoreError::not_found(message_id.as_str())),
            },
        }
    }

    async fn increment_attempts(&self, message_id: &MessageId) -> StoreResult<u32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE courier_messages
            SET attempts = attempts + 1
            WHERE message_id = $1
            RETURNING attempts
            "#,
        )
        .bind(message_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("increment_attempts", e))?;

        attempts
            .map(|a| u32::try_from(a).unwrap_or(0))
            .ok_or_else(|| StoreError::not_found(message_id.as_str()))
    }

    async fn mark_dead_lettered(&self, message_id: &MessageId) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE courier_messages SET dead_lettered = TRUE WHERE message_id = $1")
                .bind(message_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::database("mark_dead_lettered", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(message_id.as_str()));
        }
        Ok(())
    }

    async fn record_send(
        &self,
        message_id: &MessageId,
        via: Channel,
        provider_ref: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE courier_messages
            SET provider_ref = COALESCE(provider_ref, $2),
                sent_via = COALESCE(sent_via, $3)
            WHERE message_id = $1
            "#,
        )
        .bind(message_id.as_str())
        .bind(provider_ref)
        .bind(via.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("record_send", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(message_id.as_str()));
        }
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "postgres"
    }
}

#[derive(Debug, FromRow)]
struct CorrelationRow {
    provider_message_id: String,
    message_id: String,
    channel: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<CorrelationRow> for CorrelationRecord {
    type Error = StoreError;

    fn try_from(row: CorrelationRow) -> Result<Self, Self::Error> {
        Ok(CorrelationRecord {
            provider_message_id: row.provider_message_id,
            message_id: MessageId::from(row.message_id),
            channel: parse_channel("channel", &row.channel)?,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgCorrelationStore {
    pool: PgPool,
}

impl PgCorrelationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CorrelationStore for PgCorrelationStore {
    async fn put(&self, record: CorrelationRecord) -> StoreResult<CorrelationWrite> {
        let result = sqlx::query(
            r#"
            INSERT INTO courier_correlations
                (provider_message_id, message_id, channel, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider_message_id) DO NOTHING
            "#,
        )
        .bind(&record.provider_message_id)
        .bind(record.message_id.as_str())
        .bind(record.channel.as_str())
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("put_correlation", e))?;

        if result.rows_affected() == 1 {
            return Ok(CorrelationWrite::Created);
        }

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT message_id FROM courier_correlations WHERE provider_message_id = $1",
        )
        .bind(&record.provider_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("put_correlation", e))?;

        match existing {
            Some(id) if id == record.message_id.as_str() => Ok(CorrelationWrite::AlreadyPresent),
            Some(id) => Err(StoreError::conflict(
                record.provider_message_id,
                format!("already mapped to message {id}"),
            )),
            None => Err(StoreError::database(
                "put_correlation",
                "insert skipped but no existing row found",
            )),
        }
    }

    async fn get(&self, provider_message_id: &str) -> StoreResult<Option<CorrelationRecord>> {
        let row = sqlx::query_as::<_, CorrelationRow>(
            r#"
            SELECT * FROM courier_correlations
            WHERE provider_message_id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("get_correlation", e))?;

        row.map(CorrelationRecord::try_from).transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM courier_correlations WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("purge_expired", e))?;

        Ok(result.rows_affected())
    }

    fn store_type(&self) -> &'static str {
        "postgres"
    }
}
