//! # Messaging Error Types
//!
//! Structured error handling for the queue layer using thiserror.

use thiserror::Error;

/// Messaging error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue entry not found: {queue_name}: {entry_id}")]
    EntryNotFound { queue_name: String, entry_id: i64 },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Invalid queue name: {queue_name}: {reason}")]
    InvalidQueueName { queue_name: String, reason: String },
}

impl MessagingError {
    /// Create a database query error
    pub fn database_query(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an entry not found error
    pub fn entry_not_found(queue_name: impl Into<String>, entry_id: i64) -> Self {
        Self::EntryNotFound {
            queue_name: queue_name.into(),
            entry_id,
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create an invalid queue name error
    pub fn invalid_queue_name(queue_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueueName {
            queue_name: queue_name.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        Self::database_query("sqlx_operation", err)
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::message_serialization(err.to_string())
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MessagingError::queue_operation("courier_retry_queue", "receive", "timed out");
        assert_eq!(
            err.to_string(),
            "Queue operation failed: courier_retry_queue: receive: timed out"
        );
    }

    #[test]
    fn test_entry_not_found_display() {
        let err = MessagingError::entry_not_found("courier_retry_dlq", 7);
        assert!(err.to_string().contains("courier_retry_dlq: 7"));
    }
}
