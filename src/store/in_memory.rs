//! # In-Memory Stores
//!
//! `dashmap`-backed stores. Each key's shard lock serializes writers on that
//! key, which gives the same per-key conditional update semantics as the
//! Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{
    ConditionalWrite, CorrelationStore, CorrelationWrite, MessageStore, StoreError, StoreResult,
};
use crate::models::{Channel, CorrelationRecord, MessageId, MessageRecord, StateUpdate};

#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    records: DashMap<MessageId, MessageRecord>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create_if_absent(&self, record: MessageRecord) -> StoreResult<bool> {
        match self.records.entry(record.message_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn get(&self, message_id: &MessageId) -> StoreResult<Option<MessageRecord>> {
        Ok(self.records.get(message_id).map(|r| r.value().clone()))
    }

    async fn conditional_update(
        &self,
        message_id: &MessageId,
        update: &StateUpdate,
    ) -> StoreResult<ConditionalWrite> {
        let mut record = self
            .records
            .get_mut(message_id)
            .ok_or_else(|| StoreError::not_found(message_id.as_str()))?;

        if record.state != update.expected {
            return Ok(ConditionalWrite::PreconditionFailed(record.state));
        }

        update.apply_to(&mut record);
        Ok(ConditionalWrite::Applied(record.clone()))
    }

    async fn increment_attempts(&self, message_id: &MessageId) -> StoreResult<u32> {
        let mut record = self
            .records
            .get_mut(message_id)
            .ok_or_else(|| StoreError::not_found(message_id.as_str()))?;
        record.attempts = record.attempts.saturating_add(1);
        Ok(record.attempts)
    }

    async fn mark_dead_lettered(&self, message_id: &MessageId) -> StoreResult<()> {
        let mut record = self
            .records
            .get_mut(message_id)
            .ok_or_else(|| StoreError::not_found(message_id.as_str()))?;
        record.dead_lettered = true;
        Ok(())
    }

    async fn record_send(
        &self,
        message_id: &MessageId,
        via: Channel,
        provider_ref: Option<&str>,
    ) -> StoreResult<()> {
        let mut record = self
            .records
            .get_mut(message_id)
            .ok_or_else(|| StoreError::not_found(message_id.as_str()))?;
        if record.provider_ref.is_none() {
            record.provider_ref = provider_ref.map(str::to_string);
        }
        record.sent_via.get_or_insert(via);
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "in_memory"
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCorrelationStore {
    records: DashMap<String, CorrelationRecord>,
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn put(&self, record: CorrelationRecord) -> StoreResult<CorrelationWrite> {
        match self.records.entry(record.provider_message_id.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().message_id == record.message_id {
                    Ok(CorrelationWrite::AlreadyPresent)
                } else {
                    Err(StoreError::conflict(
                        record.provider_message_id,
                        format!(
                            "already mapped to message {}",
                            existing.get().message_id
                        ),
                    ))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(CorrelationWrite::Created)
            }
        }
    }

    async fn get(&self, provider_message_id: &str) -> StoreResult<Option<CorrelationRecord>> {
        let now = Utc::now();
        Ok(self
            .records
            .get(provider_message_id)
            .map(|r| r.value().clone())
            .filter(|r| !r.is_expired(now)))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    fn store_type(&self) -> &'static str {
        "in_memory"
    }
}
