//! # Message and Correlation Stores
//!
//! The two shared mutable resources of the dispatch engine. Every write is a
//! single-record write keyed by its identifier; state changes on message
//! records are conditional on the state the writer last observed.
//!
//! - [`MessageStore`] holds one [`MessageRecord`] per message
//! - [`CorrelationStore`] maps provider-assigned ids back to message ids
//!
//! Both have an in-memory implementation backed by `dashmap` and a Postgres
//! implementation backed by `sqlx`.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Channel, CorrelationRecord, MessageId, MessageRecord, StateUpdate};
use crate::state_machine::MessageState;

pub use in_memory::{InMemoryCorrelationStore, InMemoryMessageStore};
pub use postgres::{ensure_schema, PgCorrelationStore, PgMessageStore};

/// Store error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Record not found: {key}")]
    NotFound { key: String },

    #[error("Conflicting write for {key}: {reason}")]
    Conflict { key: String, reason: String },

    #[error("Database error during {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Invalid stored value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn conflict(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn database(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Database {
            operation: operation.into(),
            message: err.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a conditional state write
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalWrite {
    /// The precondition held; the updated record is returned
    Applied(MessageRecord),
    /// Another writer changed the state first; the current state is returned
    PreconditionFailed(MessageState),
}

/// Result of writing a correlation record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationWrite {
    Created,
    /// The identical mapping was already present
    AlreadyPresent,
}

/// Durable key-value table of message records keyed by message id
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert `record` unless a record with the same id exists; returns whether it was inserted
    async fn create_if_absent(&self, record: MessageRecord) -> StoreResult<bool>;

    async fn get(&self, message_id: &MessageId) -> StoreResult<Option<MessageRecord>>;

    /// Apply `update` only if the record's current state equals `update.expected`
    async fn conditional_update(
        &self,
        message_id: &MessageId,
        update: &StateUpdate,
    ) -> StoreResult<ConditionalWrite>;

    /// Atomically add one attempt, returning the new count
    async fn increment_attempts(&self, message_id: &MessageId) -> StoreResult<u32>;

    /// Set the dead-lettered flag without touching the state
    async fn mark_dead_lettered(&self, message_id: &MessageId) -> StoreResult<()>;

    /// Record which channel accepted the send and its provider reference,
    /// keeping values already stored and leaving the state untouched
    async fn record_send(
        &self,
        message_id: &MessageId,
        via: Channel,
        provider_ref: Option<&str>,
    ) -> StoreResult<()>;

    /// Backend name for diagnostics
    fn store_type(&self) -> &'static str;
}

/// Durable key-value table of provider id → message id mappings
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Write a mapping; rewriting the same mapping is a no-op, a different
    /// message id for an existing provider id is a conflict
    async fn put(&self, record: CorrelationRecord) -> StoreResult<CorrelationWrite>;

    /// Look up a live (unexpired) mapping
    async fn get(&self, provider_message_id: &str) -> StoreResult<Option<CorrelationRecord>>;

    /// Delete mappings past their retention, returning how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    fn store_type(&self) -> &'static str;
}
