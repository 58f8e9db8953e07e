use serde::{Deserialize, Serialize};
use std::fmt;

/// Message lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Initial state: accepted, not yet acknowledged by a provider
    Queued,
    /// A provider acknowledged the send
    Sent,
    /// The provider reported delivery to the recipient
    Delivered,
    /// The recipient's endpoint bounced the message
    Bounced,
    /// The provider refused the message
    Rejected,
    /// The recipient flagged the message as unwanted
    Complained,
    /// Every dispatch attempt failed and the message was dead-lettered
    Failed,
}

impl MessageState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::Bounced | Self::Rejected | Self::Complained | Self::Failed
        )
    }

    /// Check if the message still awaits a successful send
    pub fn is_awaiting_send(&self) -> bool {
        matches!(self, Self::Queued)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Bounced => "bounced",
            Self::Rejected => "rejected",
            Self::Complained => "complained",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "bounced" => Ok(Self::Bounced),
            "rejected" => Ok(Self::Rejected),
            "complained" => Ok(Self::Complained),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid message state: {s}")),
        }
    }
}

impl Default for MessageState {
    fn default() -> Self {
        Self::Queued
    }
}
