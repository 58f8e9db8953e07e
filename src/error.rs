//! Error types for the courier system.
//!

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CourierError {
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Dispatch error: {0}")]
    DispatchError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Routing error: {0}")]
    RoutingError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CourierError {
    fn from(error: serde_json::Error) -> Self {
        CourierError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for CourierError {
    fn from(err: sqlx::Error) -> Self {
        CourierError::StoreError(err.to_string())
    }
}

impl From<crate::messaging::MessagingError> for CourierError {
    fn from(error: crate::messaging::MessagingError) -> Self {
        CourierError::MessagingError(error.to_string())
    }
}

impl From<crate::store::StoreError> for CourierError {
    fn from(error: crate::store::StoreError) -> Self {
        CourierError::StoreError(error.to_string())
    }
}

impl From<crate::providers::ProviderError> for CourierError {
    fn from(error: crate::providers::ProviderError) -> Self {
        CourierError::ProviderError(error.to_string())
    }
}

impl From<crate::events::FilterError> for CourierError {
    fn from(error: crate::events::FilterError) -> Self {
        CourierError::RoutingError(error.to_string())
    }
}

impl From<crate::config::ConfigurationError> for CourierError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        CourierError::ConfigurationError(error.to_string())
    }
}

pub type CourierResult<T> = std::result::Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CourierError::DispatchError("provider unavailable".to_string());
        assert_eq!(err.to_string(), "Dispatch error: provider unavailable");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CourierError = json_err.into();
        assert!(matches!(err, CourierError::ValidationError(_)));
    }
}
