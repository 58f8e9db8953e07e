//! # Dead-Letter Handling
//!
//! Two halves:
//!
//! - [`DeadLetterReconciler`] runs when the retry queue redrives an entry. It
//!   marks the message as dead-lettered and, unless disabled, moves a
//!   still-`Queued` record to terminal `Failed`.
//! - [`DeadLetterOperations`] is the operator interface: inspect, replay and
//!   delete entries in the dead-letter queue. Nothing consumes the
//!   dead-letter queue automatically.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{CourierError, CourierResult};
use crate::messaging::{QueueEntry, QueueEntryId, WorkQueue};
use crate::models::{MessageId, Submission};
use crate::state_machine::{MessageEvent, MessageState, MessageStateMachine, TransitionOutcome};
use crate::store::MessageStore;

/// What reconciliation did to the message record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The record moved to `Failed`
    MarkedFailed { message_id: MessageId },
    /// The record was flagged but its state left as is
    Flagged {
        message_id: MessageId,
        state: MessageState,
    },
    /// The entry payload is not a submission; nothing to reconcile
    Undecodable,
}

#[derive(Debug, Clone)]
pub struct DeadLetterReconciler {
    state_machine: MessageStateMachine,
    mark_failed: bool,
}

impl DeadLetterReconciler {
    pub fn new(state_machine: MessageStateMachine, mark_failed: bool) -> Self {
        Self {
            state_machine,
            mark_failed,
        }
    }

    pub async fn reconcile(&self, entry: &QueueEntry) -> CourierResult<ReconcileOutcome> {
        let submission: Submission = match entry.decode() {
            Ok(submission) => submission,
            Err(e) => {
                warn!(entry_id = entry.id, error = %e, "Dead letter payload is not a submission");
                return Ok(ReconcileOutcome::Undecodable);
            }
        };
        let message_id = submission.message_id;

        if self.mark_failed {
            let outcome = self
                .state_machine
                .apply(&message_id, MessageEvent::RetriesExhausted)
                .await?;
            if let TransitionOutcome::Applied { .. } = outcome {
                warn!(message_id = %message_id, "💀 Retries exhausted, message marked failed");
                return Ok(ReconcileOutcome::MarkedFailed { message_id });
            }
        }

        let store = self.state_machine.store();
        store.mark_dead_lettered(&message_id).await?;
        let state = store
            .get(&message_id)
            .await?
            .map(|r| r.state)
            .unwrap_or_default();
        warn!(message_id = %message_id, state = %state, "💀 Retries exhausted, message flagged as dead-lettered");
        Ok(ReconcileOutcome::Flagged { message_id, state })
    }
}

/// Dead-letter entry joined with the current message record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterView {
    pub entry_id: QueueEntryId,
    pub receive_count: u32,
    pub message_id: Option<MessageId>,
    pub state: Option<MessageState>,
    pub attempts: Option<u32>,
    pub payload: serde_json::Value,
}

/// Operator interface over a queue's dead letters
#[derive(Clone)]
pub struct DeadLetterOperations {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn MessageStore>,
}

impl std::fmt::Debug for DeadLetterOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterOperations")
            .field("queue", &self.queue.queue_name())
            .field("store", &self.store.store_type())
            .finish()
    }
}

impl DeadLetterOperations {
    pub fn new(queue: Arc<dyn WorkQueue>, store: Arc<dyn MessageStore>) -> Self {
        Self { queue, store }
    }

    pub async fn inspect(&self) -> CourierResult<Vec<DeadLetterView>> {
        let entries = self.queue.dead_letters().await?;
        let mut views = Vec::with_capacity(entries.len());

        for entry in entries {
            let message_id = entry.decode::<Submission>().ok().map(|s| s.message_id);
            let record = match &message_id {
                Some(id) => self.store.get(id).await?,
                None => None,
            };
            views.push(DeadLetterView {
                entry_id: entry.id,
                receive_count: entry.receive_count,
                message_id,
                state: record.as_ref().map(|r| r.state),
                attempts: record.as_ref().map(|r| r.attempts),
                payload: entry.payload,
            });
        }
        Ok(views)
    }

    /// Put a dead letter back on the retry queue with a fresh receive budget.
    ///
    /// Refused when the message record is terminal, since a replayed send
    /// could no longer be reflected in its state.
    pub async fn replay(&self, entry_id: QueueEntryId) -> CourierResult<QueueEntryId> {
        let view = self.find(entry_id).await?;
        if let Some(state) = view.state {
            if state.is_terminal() {
                return Err(CourierError::ValidationError(format!(
                    "dead letter {entry_id} refers to message {} in terminal state {state}",
                    view.message_id
                        .as_ref()
                        .map(MessageId::as_str)
                        .unwrap_or("<unknown>"),
                )));
            }
        }

        let new_id = self.queue.replay_dead_letter(entry_id).await?;
        info!(
            entry_id,
            new_entry_id = new_id,
            message_id = ?view.message_id,
            "♻️ Dead letter replayed onto retry queue"
        );
        Ok(new_id)
    }

    pub async fn delete(&self, entry_id: QueueEntryId) -> CourierResult<()> {
        self.queue.delete_dead_letter(entry_id).await?;
        info!(entry_id, "🗑️ Dead letter deleted");
        Ok(())
    }

    async fn find(&self, entry_id: QueueEntryId) -> CourierResult<DeadLetterView> {
        self.inspect()
            .await?
            .into_iter()
            .find(|v| v.entry_id == entry_id)
            .ok_or_else(|| CourierError::NotFound(format!("dead letter {entry_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{send_json, InMemoryQueue, QueueSettings};
    use crate::models::{Channel, ChannelTarget, MessageRecord, SubmissionRequest};
    use crate::store::InMemoryMessageStore;
    use serde_json::json;

    fn submission(id: &str) -> Submission {
        Submission::new(
            MessageId::from(id),
            SubmissionRequest {
                target: ChannelTarget {
                    channel: Channel::Sms,
                    recipient: "+15550100".to_string(),
                    sender: None,
                    content: json!({"message": "hi"}),
                },
                fallback: None,
            },
        )
    }

    async fn dead_lettered_queue(id: &str) -> Arc<InMemoryQueue> {
        let queue = Arc::new(InMemoryQueue::new(
            QueueSettings::new("retry").with_max_receive_count(1),
        ));
        let entry_id = send_json(queue.as_ref(), &submission(id), None).await.unwrap();
        queue.receive(1).await.unwrap();
        queue.release(entry_id).await.unwrap();
        assert_eq!(queue.receive(1).await.unwrap().dead_lettered.len(), 1);
        queue
    }

    #[tokio::test]
    async fn test_reconcile_marks_queued_record_failed() {
        let store = Arc::new(InMemoryMessageStore::new());
        let id = MessageId::from("M1");
        store
            .create_if_absent(MessageRecord::queued(id.clone(), Channel::Sms))
            .await
            .unwrap();
        let queue = dead_lettered_queue("M1").await;
        let entry = queue.dead_letters().await.unwrap().remove(0);

        let reconciler = DeadLetterReconciler::new(MessageStateMachine::new(store.clone()), true);
        let outcome = reconciler.reconcile(&entry).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::MarkedFailed { message_id: id.clone() });
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, MessageState::Failed);
        assert!(record.dead_lettered);
    }

    #[tokio::test]
    async fn test_reconcile_can_leave_state_untouched() {
        let store = Arc::new(InMemoryMessageStore::new());
        let id = MessageId::from("M2");
        store
            .create_if_absent(MessageRecord::queued(id.clone(), Channel::Sms))
            .await
            .unwrap();
        let queue = dead_lettered_queue("M2").await;
        let entry = queue.dead_letters().await.unwrap().remove(0);

        let reconciler = DeadLetterReconciler::new(MessageStateMachine::new(store.clone()), false);
        let outcome = reconciler.reconcile(&entry).await.unwrap();

        assert!(matches!(
            outcome,
            ReconcileOutcome::Flagged {
                state: MessageState::Queued,
                ..
            }
        ));
        assert!(store.get(&id).await.unwrap().unwrap().dead_lettered);
    }

    #[tokio::test]
    async fn test_replay_refused_for_terminal_record() {
        let store = Arc::new(InMemoryMessageStore::new());
        let id = MessageId::from("M3");
        let mut record = MessageRecord::queued(id.clone(), Channel::Sms);
        record.state = MessageState::Failed;
        store.create_if_absent(record).await.unwrap();

        let queue = dead_lettered_queue("M3").await;
        let ops = DeadLetterOperations::new(queue.clone(), store);
        let entry_id = ops.inspect().await.unwrap()[0].entry_id;

        assert!(ops.replay(entry_id).await.is_err());
        assert_eq!(queue.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_and_delete() {
        let store = Arc::new(InMemoryMessageStore::new());
        store
            .create_if_absent(MessageRecord::queued(MessageId::from("M4"), Channel::Sms))
            .await
            .unwrap();
        let queue = dead_lettered_queue("M4").await;
        let ops = DeadLetterOperations::new(queue.clone(), store);

        let views = ops.inspect().await.unwrap();
        assert_eq!(views[0].message_id, Some(MessageId::from("M4")));
        assert_eq!(views[0].state, Some(MessageState::Queued));

        ops.replay(views[0].entry_id).await.unwrap();
        assert_eq!(queue.len().await, 1);
        assert!(ops.delete(views[0].entry_id).await.is_err());
    }
}
