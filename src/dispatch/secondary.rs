//! # Secondary Dispatcher
//!
//! Consumes the retry queue. Each invocation makes exactly one provider call
//! through the submission's retry target and reports the result to the
//! queue; the queue's receive budget is the only retry counter.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::dead_letter::DeadLetterReconciler;
use super::worker::{EntryDisposition, QueueHandler};
use super::{DispatchContext, DispatchOutcome};
use crate::error::{CourierError, CourierResult};
use crate::logging::log_dispatch_operation;
use crate::messaging::QueueEntry;
use crate::models::{MessageRecord, Submission};

#[derive(Debug, Clone)]
pub struct SecondaryDispatcher {
    context: Arc<DispatchContext>,
    reconciler: DeadLetterReconciler,
}

impl SecondaryDispatcher {
    pub fn new(context: Arc<DispatchContext>, reconciler: DeadLetterReconciler) -> Self {
        Self {
            context,
            reconciler,
        }
    }

    /// Make one retry attempt for `submission`
    pub async fn dispatch(&self, submission: &Submission) -> CourierResult<DispatchOutcome> {
        let message_id = &submission.message_id;

        // replayed entries may reference a record that was never written
        self.context
            .messages()
            .create_if_absent(MessageRecord::queued(
                message_id.clone(),
                submission.channel(),
            ))
            .await?;

        let record = self
            .context
            .messages()
            .get(message_id)
            .await?
            .ok_or_else(|| CourierError::NotFound(format!("message {message_id}")))?;

        if !record.state.is_awaiting_send() {
            log_dispatch_operation(
                "secondary_skipped",
                message_id,
                record.channel,
                record.attempts,
                Some(record.state.as_str()),
                None,
            );
            return Ok(DispatchOutcome::Skipped {
                state: record.state,
                attempts: record.attempts,
            });
        }

        let target = submission.retry_target();
        match self.context.attempt_send(message_id, target).await? {
            Ok(accepted) => {
                info!(
                    message_id = %message_id,
                    channel = %accepted.via,
                    original_channel = %submission.channel(),
                    attempts = accepted.attempts,
                    "✅ Retry send accepted by provider"
                );
                Ok(DispatchOutcome::Sent {
                    via: accepted.via,
                    provider_ref: accepted.provider_ref,
                    attempts: accepted.attempts,
                })
            }
            Err(provider_error) => {
                let attempts = self.context.messages().increment_attempts(message_id).await?;
                warn!(
                    message_id = %message_id,
                    channel = %target.channel,
                    attempts,
                    error_kind = provider_error.kind(),
                    error = %provider_error,
                    "🔄 Retry send failed, leaving entry for redelivery"
                );
                log_dispatch_operation(
                    "retry_failed",
                    message_id,
                    target.channel,
                    attempts,
                    None,
                    Some(&provider_error.to_string()),
                );
                Ok(DispatchOutcome::AttemptFailed {
                    attempts,
                    error: provider_error.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl QueueHandler for SecondaryDispatcher {
    fn name(&self) -> &str {
        "secondary_dispatcher"
    }

    async fn handle(&self, entry: &QueueEntry) -> CourierResult<EntryDisposition> {
        // an undecodable entry is left to exhaust its budget into the dead-letter queue
        let submission: Submission = entry.decode()?;

        match self.dispatch(&submission).await? {
            DispatchOutcome::AttemptFailed { .. } => Ok(EntryDisposition::Retry),
            _ => Ok(EntryDisposition::Ack),
        }
    }

    async fn on_dead_letter(&self, entry: &QueueEntry) {
        match self.reconciler.reconcile(entry).await {
            Ok(outcome) => info!(
                entry_id = entry.id,
                receive_count = entry.receive_count,
                outcome = ?outcome,
                "☠️ Dead-lettered retry entry reconciled"
            ),
            Err(e) => error!(
                entry_id = entry.id,
                error = %e,
                "❌ Failed to reconcile dead-lettered retry entry"
            ),
        }
    }
}
