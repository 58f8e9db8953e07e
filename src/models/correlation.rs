use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Channel, MessageId};

/// Maps a channel provider's own identifier back to the internal message id
///
/// Written once after a provider acknowledges a send on a channel whose
/// delivery events do not echo the internal id, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub provider_message_id: String,
    pub message_id: MessageId,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CorrelationRecord {
    pub fn new(
        provider_message_id: impl Into<String>,
        message_id: MessageId,
        channel: Channel,
        retention: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            provider_message_id: provider_message_id.into(),
            message_id,
            channel,
            created_at,
            expires_at: created_at + retention,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
