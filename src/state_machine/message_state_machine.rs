use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::{StateMachineError, StateMachineResult};
use super::events::{DeliveryOutcome, MessageEvent};
use super::guards::TransitionGuard;
use super::states::MessageState;
use crate::models::{MessageId, MessageRecord, StateUpdate};
use crate::store::{ConditionalWrite, MessageStore};

/// Why a transition attempt left the record untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    /// The record is already terminal; duplicates and late events land here
    AlreadyTerminal,
    /// The record is already in the requested state
    AlreadyInState,
    /// The message was sent, so exhausting retries changes nothing
    AlreadySent,
}

/// Outcome of the pure transition function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    Apply(MessageState),
    NoOp(NoOpReason),
}

/// Pure function of (current state, event) to the next step
///
/// Tolerates out-of-order arrival: a delivery outcome may land on a record that
/// is still `Queued` because the dispatcher's `Sent` write has not happened yet.
pub fn determine_transition(current: MessageState, event: &MessageEvent) -> TransitionDecision {
    use MessageState::*;

    match (current, event) {
        (Delivered | Bounced | Rejected | Complained | Failed, _) => {
            TransitionDecision::NoOp(NoOpReason::AlreadyTerminal)
        }

        (Queued, MessageEvent::SendSucceeded { .. }) => TransitionDecision::Apply(Sent),
        (Sent, MessageEvent::SendSucceeded { .. }) => {
            TransitionDecision::NoOp(NoOpReason::AlreadyInState)
        }

        (Sent, MessageEvent::ProviderReported(DeliveryOutcome::Sent)) => {
            TransitionDecision::NoOp(NoOpReason::AlreadyInState)
        }
        (_, MessageEvent::ProviderReported(outcome)) => {
            TransitionDecision::Apply(outcome.target_state())
        }

        (Queued, MessageEvent::RetriesExhausted) => TransitionDecision::Apply(Failed),
        (_, MessageEvent::RetriesExhausted) => TransitionDecision::NoOp(NoOpReason::AlreadySent),
    }
}

/// Result of applying an event to a stored record
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied {
        from: MessageState,
        to: MessageState,
        record: MessageRecord,
    },
    NoOp {
        state: MessageState,
        reason: NoOpReason,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// State of the record after the attempt
    pub fn state(&self) -> MessageState {
        match self {
            Self::Applied { to, .. } => *to,
            Self::NoOp { state, .. } => *state,
        }
    }
}

/// Applies lifecycle events to message records through conditional writes
///
/// No locks are held between reading and writing. Each write carries the state
/// it was computed from; when another writer got there first the event is
/// re-evaluated against the fresh record.
#[derive(Clone)]
pub struct MessageStateMachine {
    store: Arc<dyn MessageStore>,
    max_conflict_retries: u32,
}

impl std::fmt::Debug for MessageStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStateMachine")
            .field("store", &self.store.store_type())
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish()
    }
}

impl MessageStateMachine {
    pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            max_conflict_retries: Self::DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Apply an event to the record identified by `message_id`
    pub async fn apply(
        &self,
        message_id: &MessageId,
        event: MessageEvent,
    ) -> StateMachineResult<TransitionOutcome> {
        let max_attempts = self.max_conflict_retries.saturating_add(1);

        for attempt in 1..=max_attempts {
            let record = self.store.get(message_id).await?.ok_or_else(|| {
                StateMachineError::MessageNotFound {
                    message_id: message_id.to_string(),
                }
            })?;

            let target = match determine_transition(record.state, &event) {
                TransitionDecision::NoOp(reason) => {
                    debug!(
                        message_id = %message_id,
                        state = %record.state,
                        event = event.event_type(),
                        reason = ?reason,
                        "State transition skipped"
                    );
                    return Ok(TransitionOutcome::NoOp {
                        state: record.state,
                        reason,
                    });
                }
                TransitionDecision::Apply(target) => target,
            };

            TransitionGuard::can_transition(record.state, target)?;

            let update = Self::build_update(record.state, target, &event);
            match self.store.conditional_update(message_id, &update).await? {
                ConditionalWrite::Applied(updated) => {
                    debug!(
                        message_id = %message_id,
                        from = %record.state,
                        to = %target,
                        event = event.event_type(),
                        "State transition applied"
                    );
                    return Ok(TransitionOutcome::Applied {
                        from: record.state,
                        to: target,
                        record: updated,
                    });
                }
                ConditionalWrite::PreconditionFailed(actual) => {
                    debug!(
                        message_id = %message_id,
                        expected = %record.state,
                        actual = %actual,
                        attempt = attempt,
                        "Concurrent state write detected, re-evaluating"
                    );
                }
            }
        }

        Err(StateMachineError::ConcurrentModification {
            message_id: message_id.to_string(),
            attempts: max_attempts,
        })
    }

    fn build_update(from: MessageState, to: MessageState, event: &MessageEvent) -> StateUpdate {
        let mut update = StateUpdate::new(from, to);
        match event {
            MessageEvent::SendSucceeded { via, provider_ref } => {
                update.provider_ref = provider_ref.clone();
                update.sent_via = Some(*via);
            }
            MessageEvent::RetriesExhausted => update.dead_lettered = true,
            MessageEvent::ProviderReported(_) => {}
        }
        update
    }
}
