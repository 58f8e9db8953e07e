//! # Submission Ingress
//!
//! The caller-facing edge of the engine: validate a request, assign its
//! message id, and put it on the primary input queue. The acknowledgment is
//! returned as soon as the submission is queued; delivery happens later.
//! Transport, authentication and rate limiting belong to whatever hosts this.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::CourierResult;
use crate::messaging::{send_json, WorkQueue};
use crate::models::{Channel, MessageId, Submission, SubmissionRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub message_id: MessageId,
    pub channel: Channel,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SubmissionIngress {
    input_queue: Arc<dyn WorkQueue>,
}

impl std::fmt::Debug for SubmissionIngress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionIngress")
            .field("input_queue", &self.input_queue.queue_name())
            .finish()
    }
}

impl SubmissionIngress {
    pub fn new(input_queue: Arc<dyn WorkQueue>) -> Self {
        Self { input_queue }
    }

    pub async fn accept(&self, request: SubmissionRequest) -> CourierResult<SubmissionAck> {
        request.target.validate()?;
        if let Some(fallback) = &request.fallback {
            fallback.validate()?;
        }

        let submission = Submission::new(MessageId::generate(), request);
        send_json(self.input_queue.as_ref(), &submission, None).await?;

        info!(
            message_id = %submission.message_id,
            channel = %submission.channel(),
            has_fallback = submission.fallback.is_some(),
            "📥 Submission accepted"
        );

        Ok(SubmissionAck {
            message_id: submission.message_id,
            channel: submission.target.channel,
            accepted_at: submission.submitted_at,
        })
    }

    /// Parse and accept a raw JSON request body
    pub async fn accept_json(&self, body: &str) -> CourierResult<SubmissionAck> {
        let request: SubmissionRequest = serde_json::from_str(body)?;
        self.accept(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;
    use crate::messaging::{InMemoryQueue, QueueSettings};

    fn ingress() -> (SubmissionIngress, Arc<InMemoryQueue>) {
        let queue = Arc::new(InMemoryQueue::new(QueueSettings::new("input")));
        (SubmissionIngress::new(queue.clone()), queue)
    }

    #[tokio::test]
    async fn test_accepted_submission_is_queued_with_generated_id() {
        let (ingress, queue) = ingress();
        let ack = ingress
            .accept_json(r#"{"channel":"email","recipient":"a@b.com","content":{"template":"welcome"}}"#)
            .await
            .unwrap();

        let batch = queue.receive(1).await.unwrap();
        let queued: Submission = batch.entries[0].decode().unwrap();
        assert_eq!(queued.message_id, ack.message_id);
        assert_eq!(ack.channel, Channel::Email);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_not_queued() {
        let (ingress, queue) = ingress();
        let err = ingress
            .accept_json(r#"{"channel":"sms","recipient":"","content":{"message":"hi"}}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::ValidationError(_)));

        let err = ingress
            .accept_json(r#"{"channel":"pager","recipient":"x","content":{}}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::ValidationError(_)));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_fallback_target_is_validated() {
        let (ingress, _queue) = ingress();
        let body = r#"{
            "channel": "chat", "recipient": "+15550100", "content": {"message": "hi"},
            "fallback": {"channel": "sms", "recipient": "+15550100", "content": {}}
        }"#;
        assert!(ingress.accept_json(body).await.is_err());
    }
}
