use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::state_machine::MessageState;

/// Delivery medium for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Chat,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Chat => "chat",
        }
    }

    /// Whether this channel's delivery events omit the internal message id,
    /// so sends must record a provider-id correlation
    pub fn requires_correlation(&self) -> bool {
        matches!(self, Self::Chat)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "chat" | "whatsapp" => Ok(Self::Chat),
            _ => Err(format!("Invalid channel: {s}")),
        }
    }
}

/// Internally generated, never reused message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh, time-ordered identifier
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One durable record per message in the message store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub channel: Channel,
    pub state: MessageState,
    /// Delivery attempts across both dispatch stages
    pub attempts: u32,
    pub last_updated: DateTime<Utc>,
    /// Provider-assigned reference from the accepted send
    pub provider_ref: Option<String>,
    /// Channel that accepted the send, differs from `channel` after a fallback
    pub sent_via: Option<Channel>,
    /// Set once the retry queue dead-lettered this message
    pub dead_lettered: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Build the initial `Queued` record for a new submission
    pub fn queued(message_id: MessageId, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            message_id,
            channel,
            state: MessageState::Queued,
            attempts: 0,
            last_updated: now,
            provider_ref: None,
            sent_via: None,
            dead_lettered: false,
            created_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Conditional state write applied by the store only when the current state
/// still equals `expected`
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub expected: MessageState,
    pub to: MessageState,
    pub provider_ref: Option<String>,
    pub sent_via: Option<Channel>,
    pub dead_lettered: bool,
    pub at: DateTime<Utc>,
}

impl StateUpdate {
    pub fn new(expected: MessageState, to: MessageState) -> Self {
        Self {
            expected,
            to,
            provider_ref: None,
            sent_via: None,
            dead_lettered: false,
            at: Utc::now(),
        }
    }

    /// Apply this update to an in-memory copy of the record
    pub fn apply_to(&self, record: &mut MessageRecord) {
        record.state = self.to;
        record.last_updated = self.at;
        if let Some(provider_ref) = &self.provider_ref {
            record.provider_ref = Some(provider_ref.clone());
        }
        if let Some(via) = self.sent_via {
            record.sent_via = Some(via);
        }
        if self.dead_lettered {
            record.dead_lettered = true;
        }
    }
}
