//! # Configuration
//!
//! Typed configuration for the dispatch engine. Every section deserializes
//! with defaults, so a deployment only states what it changes. Loading and
//! layering live in [`loader::ConfigManager`].

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::queues;
use crate::events::{FilterPolicy, RedeliveryPolicy};
use crate::messaging::{validate_queue_name, QueueSettings};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Longest a received entry may stay hidden (SQS caps visibility at 12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;

/// Longest a retry hand-off may be delayed (SQS caps message delay at 15 minutes)
pub const MAX_RETRY_DELAY_SECONDS: u64 = 900;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub dispatch: DispatchConfig,
    pub queues: QueueConfig,
    pub correlation: CorrelationConfig,
    pub routing: RoutingConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound for one provider call
    pub provider_timeout_ms: u64,
    /// Move still-queued records to `Failed` when their retry entry is dead-lettered
    pub mark_failed_on_dead_letter: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 10_000,
            mark_failed_on_dead_letter: true,
        }
    }
}

impl DispatchConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    InMemory,
    Pgmq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub primary_queue: String,
    pub retry_queue: String,
    pub dead_letter_queue: String,
    /// Receives allowed per retry entry before it is dead-lettered
    pub max_receive_count: u32,
    pub visibility_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    /// Delay before a handed-off submission becomes visible on the retry queue
    pub retry_delay_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            primary_queue: queues::PRIMARY_INPUT_QUEUE.to_string(),
            retry_queue: queues::RETRY_QUEUE.to_string(),
            dead_letter_queue: queues::DEAD_LETTER_QUEUE.to_string(),
            max_receive_count: queues::DEFAULT_MAX_RECEIVE_COUNT,
            visibility_timeout_seconds: 30,
            poll_interval_ms: 500,
            batch_size: 10,
            retry_delay_seconds: 0,
        }
    }
}

impl QueueConfig {
    /// Input queue settings; the input queue has no receive budget
    pub fn primary_settings(&self) -> QueueSettings {
        QueueSettings::new(&self.primary_queue).with_visibility_timeout(self.visibility_timeout())
    }

    pub fn retry_settings(&self) -> QueueSettings {
        QueueSettings::new(&self.retry_queue)
            .with_max_receive_count(self.max_receive_count)
            .with_visibility_timeout(self.visibility_timeout())
            .with_dead_letter_name(&self.dead_letter_queue)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// How long provider-id mappings stay resolvable
    pub retention_hours: u64,
    pub purge_interval_seconds: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            retention_hours: 72,
            purge_interval_seconds: 3_600,
        }
    }
}

impl CorrelationConfig {
    pub fn retention(&self) -> chrono::Duration {
        const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;
        chrono::Duration::hours(self.retention_hours.min(MAX_RETENTION_HOURS) as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Capacity of the channel feeding a spawned router
    pub channel_capacity: usize,
    /// Deliveries tried per subscriber before a failing event is given up on
    pub max_delivery_attempts: u32,
    pub redelivery_backoff_ms: u64,
    pub max_redelivery_backoff_ms: u64,
    /// Per-subscriber filter policy overrides, keyed by subscriber name
    pub filter_policies: HashMap<String, Value>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
            max_delivery_attempts: 5,
            redelivery_backoff_ms: 100,
            max_redelivery_backoff_ms: 5_000,
            filter_policies: HashMap::new(),
        }
    }
}

impl RoutingConfig {
    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_attempts: self.max_delivery_attempts,
            initial_backoff: Duration::from_millis(self.redelivery_backoff_ms),
            max_backoff: Duration::from_millis(self.max_redelivery_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl CourierConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.dispatch.provider_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.provider_timeout_ms",
                0,
                "provider calls need a non-zero timeout",
            ));
        }
        if self.queues.max_receive_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.max_receive_count",
                0,
                "retry entries must be receivable at least once",
            ));
        }
        if self.queues.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.poll_interval_ms",
                0,
                "an idle worker would spin without a poll interval",
            ));
        }
        if self.queues.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(ConfigurationError::invalid_value(
                "queues.visibility_timeout_seconds",
                self.queues.visibility_timeout_seconds,
                format!("must be at most {MAX_VISIBILITY_TIMEOUT_SECONDS}"),
            ));
        }
        if self.queues.retry_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(ConfigurationError::invalid_value(
                "queues.retry_delay_seconds",
                self.queues.retry_delay_seconds,
                format!("must be at most {MAX_RETRY_DELAY_SECONDS}"),
            ));
        }
        if self.queues.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.batch_size",
                0,
                "workers must receive at least one entry per poll",
            ));
        }

        let names = [
            ("queues.primary_queue", &self.queues.primary_queue),
            ("queues.retry_queue", &self.queues.retry_queue),
            ("queues.dead_letter_queue", &self.queues.dead_letter_queue),
        ];
        for (field, name) in names {
            validate_queue_name(name)
                .map_err(|e| ConfigurationError::invalid_value(field, name, e.to_string()))?;
        }
        if self.queues.retry_queue == self.queues.dead_letter_queue {
            return Err(ConfigurationError::invalid_value(
                "queues.dead_letter_queue",
                &self.queues.dead_letter_queue,
                "must differ from the retry queue",
            ));
        }

        if self.correlation.retention_hours == 0 {
            return Err(ConfigurationError::invalid_value(
                "correlation.retention_hours",
                0,
                "correlations must outlive the provider's event delivery window",
            ));
        }

        if self.routing.max_delivery_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "routing.max_delivery_attempts",
                0,
                "every matching subscriber must get at least one delivery",
            ));
        }

        for (name, policy) in &self.routing.filter_policies {
            FilterPolicy::compile(policy).map_err(|e| {
                ConfigurationError::invalid_value(
                    format!("routing.filter_policies.{name}"),
                    policy,
                    e.to_string(),
                )
            })?;
        }

        if self.queues.backend == QueueBackend::Pgmq && self.database.url.is_none() {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                "<unset>",
                "the pgmq queue backend needs a database",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        let config = CourierConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queues.max_receive_count, 5);
        assert!(config.dispatch.mark_failed_on_dead_letter);
    }

    #[test]
    fn test_retry_settings_carry_budget() {
        let settings = QueueConfig::default().retry_settings();
        assert_eq!(settings.max_receive_count, Some(5));
        assert_eq!(settings.dead_letter_name(), "courier_retry_dlq");
        assert_eq!(QueueConfig::default().primary_settings().max_receive_count, None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = CourierConfig::default();
        config.queues.max_receive_count = 0;
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.dispatch.provider_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.queues.retry_queue = "Bad Name".to_string();
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config
            .routing
            .filter_policies
            .insert("sms".to_string(), json!({"context": "primary"}));
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.queues.backend = QueueBackend::Pgmq;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_queue_timing() {
        let mut config = CourierConfig::default();
        config.queues.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.queues.visibility_timeout_seconds = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.queues.retry_delay_seconds = MAX_RETRY_DELAY_SECONDS + 1;
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.queues.visibility_timeout_seconds = MAX_VISIBILITY_TIMEOUT_SECONDS;
        config.queues.retry_delay_seconds = MAX_RETRY_DELAY_SECONDS;
        assert!(config.validate().is_ok());

        let mut config = CourierConfig::default();
        config.routing.max_delivery_attempts = 0;
        assert!(config.validate().is_err());
    }
}
