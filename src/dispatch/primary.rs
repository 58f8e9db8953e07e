//! # Primary Dispatcher
//!
//! First delivery attempt for each submission taken from the input queue.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::worker::{EntryDisposition, QueueHandler};
use super::{DispatchContext, DispatchOutcome};
use crate::error::CourierResult;
use crate::logging::log_dispatch_operation;
use crate::messaging::{send_json, QueueEntry, WorkQueue};
use crate::models::{MessageRecord, Submission};

#[derive(Clone)]
pub struct PrimaryDispatcher {
    context: Arc<DispatchContext>,
    retry_queue: Arc<dyn WorkQueue>,
    retry_delay: Option<Duration>,
}

impl std::fmt::Debug for PrimaryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryDispatcher")
            .field("context", &self.context)
            .field("retry_queue", &self.retry_queue.queue_name())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl PrimaryDispatcher {
    pub fn new(context: Arc<DispatchContext>, retry_queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            context,
            retry_queue,
            retry_delay: None,
        }
    }

    /// Delay before a handed-off submission becomes visible on the retry queue
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = (!delay.is_zero()).then_some(delay);
        self
    }

    /// Dispatch one submission.
    ///
    /// A redelivered submission whose record has left `Queued`, or that has
    /// already been attempted, is skipped without calling the provider.
    pub async fn dispatch(&self, submission: &Submission) -> CourierResult<DispatchOutcome> {
        let message_id = &submission.message_id;
        let created = self
            .context
            .messages()
            .create_if_absent(MessageRecord::queued(
                message_id.clone(),
                submission.channel(),
            ))
            .await?;

        if !created {
            if let Some(existing) = self.context.messages().get(message_id).await? {
                if !existing.state.is_awaiting_send() || existing.attempts > 0 {
                    log_dispatch_operation(
                        "primary_skipped",
                        message_id,
                        submission.channel(),
                        existing.attempts,
                        Some(existing.state.as_str()),
                        None,
                    );
                    return Ok(DispatchOutcome::Skipped {
                        state: existing.state,
                        attempts: existing.attempts,
                    });
                }
            }
        }

        let target = submission.primary_target();
        match self.context.attempt_send(message_id, target).await? {
            Ok(accepted) => {
                info!(
                    message_id = %message_id,
                    channel = %accepted.via,
                    attempts = accepted.attempts,
                    "✅ Primary send accepted by provider"
                );
                Ok(DispatchOutcome::Sent {
                    via: accepted.via,
                    provider_ref: accepted.provider_ref,
                    attempts: accepted.attempts,
                })
            }
            Err(provider_error) => {
                // hand off before counting the attempt: a redelivered input entry
                // with attempts == 0 is still ours to send
                send_json(self.retry_queue.as_ref(), submission, self.retry_delay).await?;
                let attempts = self.context.messages().increment_attempts(message_id).await?;

                warn!(
                    message_id = %message_id,
                    channel = %target.channel,
                    attempts,
                    error_kind = provider_error.kind(),
                    error = %provider_error,
                    retry_queue = %self.retry_queue.queue_name(),
                    "🔄 Primary send failed, submission handed to retry queue"
                );
                log_dispatch_operation(
                    "retry_scheduled",
                    message_id,
                    target.channel,
                    attempts,
                    None,
                    Some(&provider_error.to_string()),
                );
                Ok(DispatchOutcome::RetryScheduled {
                    attempts,
                    error: provider_error.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl QueueHandler for PrimaryDispatcher {
    fn name(&self) -> &str {
        "primary_dispatcher"
    }

    async fn handle(&self, entry: &QueueEntry) -> CourierResult<EntryDisposition> {
        let submission: Submission = match entry.decode() {
            Ok(submission) => submission,
            Err(e) => {
                // the input queue has no receive budget; drop instead of looping
                error!(entry_id = entry.id, error = %e, "❌ Undecodable submission dropped");
                return Ok(EntryDisposition::Ack);
            }
        };

        self.dispatch(&submission).await?;
        Ok(EntryDisposition::Ack)
    }
}
