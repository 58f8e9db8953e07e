use crate::error::CourierError;
use crate::store::StoreError;
use thiserror::Error;

/// Error types for message state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Message {message_id} not found")]
    MessageNotFound { message_id: String },

    #[error("Concurrent modification of message {message_id} persisted after {attempts} attempts")]
    ConcurrentModification { message_id: String, attempts: u32 },

    #[error("Persistence operation failed: {reason}")]
    PersistenceFailed { reason: String },
}

/// Specific error type for guard condition failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Transition out of terminal state {state} is not allowed")]
    TerminalState { state: String },

    #[error("Backward transition from {from} to {to} is not allowed")]
    BackwardTransition { from: String, to: String },
}

impl From<GuardError> for StateMachineError {
    fn from(err: GuardError) -> Self {
        Self::GuardFailed {
            reason: err.to_string(),
        }
    }
}

impl From<StoreError> for StateMachineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => Self::MessageNotFound { message_id: key },
            other => Self::PersistenceFailed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<StateMachineError> for CourierError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::MessageNotFound { message_id } => {
                CourierError::NotFound(format!("message {message_id}"))
            }
            other => CourierError::StateTransitionError(other.to_string()),
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;
