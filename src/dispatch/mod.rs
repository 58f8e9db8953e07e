//! # Dispatch
//!
//! The send half of the engine. The primary dispatcher makes the first
//! attempt for each submission and hands failures to the retry queue; the
//! secondary dispatcher makes exactly one attempt per retry-queue delivery and
//! lets the queue's receive budget decide when to give up.
//!
//! Both stages share [`DispatchContext`], which owns the provider registry,
//! the state machine over the message store, and the correlation store.

pub mod dead_letter;
pub mod primary;
pub mod secondary;
pub mod worker;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::CourierResult;
use crate::logging::log_dispatch_operation;
use crate::models::{Channel, ChannelTarget, CorrelationRecord, MessageId};
use crate::providers::{ProviderError, ProviderRegistry, SendRequest};
use crate::state_machine::{MessageEvent, MessageState, MessageStateMachine};
use crate::store::{CorrelationStore, CorrelationWrite, MessageStore};

pub use dead_letter::{DeadLetterOperations, DeadLetterReconciler, DeadLetterView, ReconcileOutcome};
pub use primary::PrimaryDispatcher;
pub use secondary::SecondaryDispatcher;
pub use worker::{BatchReport, DispatchWorker, EntryDisposition, QueueHandler, WorkerStats};

/// Result of one dispatcher invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The provider accepted the message
    Sent {
        via: Channel,
        provider_ref: Option<String>,
        attempts: u32,
    },
    /// The message was already handled; nothing was sent
    Skipped { state: MessageState, attempts: u32 },
    /// The first attempt failed and the submission was put on the retry queue
    RetryScheduled { attempts: u32, error: String },
    /// A retry attempt failed; the retry queue will redeliver or dead-letter
    AttemptFailed { attempts: u32, error: String },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Skipped { .. } => "skipped",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::AttemptFailed { .. } => "attempt_failed",
        }
    }
}

/// Successful provider call after its side effects were recorded
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SendAccepted {
    pub via: Channel,
    pub provider_ref: Option<String>,
    pub attempts: u32,
}

/// Collaborators shared by both dispatch stages
#[derive(Clone)]
pub struct DispatchContext {
    providers: ProviderRegistry,
    state_machine: MessageStateMachine,
    correlations: Arc<dyn CorrelationStore>,
    correlation_retention: ChronoDuration,
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("providers", &self.providers)
            .field("state_machine", &self.state_machine)
            .field("correlations", &self.correlations.store_type())
            .field("correlation_retention", &self.correlation_retention)
            .finish()
    }
}

impl DispatchContext {
    pub fn new(
        providers: ProviderRegistry,
        messages: Arc<dyn MessageStore>,
        correlations: Arc<dyn CorrelationStore>,
        correlation_retention: ChronoDuration,
    ) -> Self {
        Self {
            providers,
            state_machine: MessageStateMachine::new(messages),
            correlations,
            correlation_retention,
        }
    }

    pub fn messages(&self) -> &Arc<dyn MessageStore> {
        self.state_machine.store()
    }

    pub fn state_machine(&self) -> &MessageStateMachine {
        &self.state_machine
    }

    pub fn correlations(&self) -> &Arc<dyn CorrelationStore> {
        &self.correlations
    }

    /// One provider call for `target`.
    ///
    /// On success the correlation record (for channels that need one) is
    /// written before the `Sent` transition so an early delivery event can
    /// already resolve, then attempts are incremented. On failure nothing is
    /// recorded; the caller owns the failure side effects.
    pub(crate) async fn attempt_send(
        &self,
        message_id: &MessageId,
        target: &ChannelTarget,
    ) -> CourierResult<Result<SendAccepted, ProviderError>> {
        let request = SendRequest::tagged(message_id, target);
        let receipt = match self.providers.send(&request).await {
            Ok(receipt) => receipt,
            Err(error) => return Ok(Err(error)),
        };

        let via = target.channel;
        if via.requires_correlation() {
            self.record_correlation(message_id, via, receipt.provider_ref.as_deref())
                .await?;
        }

        let transition = self
            .state_machine
            .apply(
                message_id,
                MessageEvent::send_succeeded(via, receipt.provider_ref.clone()),
            )
            .await?;
        if !transition.is_applied() {
            // a provider event moved the record first; the send details still belong on it
            self.messages()
                .record_send(message_id, via, receipt.provider_ref.as_deref())
                .await?;
        }
        let attempts = self.messages().increment_attempts(message_id).await?;

        log_dispatch_operation(
            "send_succeeded",
            message_id,
            via,
            attempts,
            Some(&transition.state().to_string()),
            None,
        );

        Ok(Ok(SendAccepted {
            via,
            provider_ref: receipt.provider_ref,
            attempts,
        }))
    }

    async fn record_correlation(
        &self,
        message_id: &MessageId,
        channel: Channel,
        provider_ref: Option<&str>,
    ) -> CourierResult<()> {
        let Some(provider_ref) = provider_ref else {
            warn!(
                message_id = %message_id,
                channel = %channel,
                "⚠️ Provider returned no reference; delivery events for this send cannot be correlated"
            );
            return Ok(());
        };

        let record = CorrelationRecord::new(
            provider_ref,
            message_id.clone(),
            channel,
            self.correlation_retention,
        );
        match self.correlations.put(record).await? {
            CorrelationWrite::Created => {
                debug!(message_id = %message_id, provider_ref, "🔗 Correlation recorded")
            }
            CorrelationWrite::AlreadyPresent => {
                debug!(message_id = %message_id, provider_ref, "Correlation already present")
            }
        }
        Ok(())
    }
}
