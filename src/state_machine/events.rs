use serde::{Deserialize, Serialize};

use super::states::MessageState;
use crate::models::Channel;

/// Delivery outcomes a provider event can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Delivered,
    Bounced,
    Rejected,
    Complained,
}

impl DeliveryOutcome {
    /// State a record moves to when this outcome is applied
    pub fn target_state(&self) -> MessageState {
        match self {
            Self::Sent => MessageState::Sent,
            Self::Delivered => MessageState::Delivered,
            Self::Bounced => MessageState::Bounced,
            Self::Rejected => MessageState::Rejected,
            Self::Complained => MessageState::Complained,
        }
    }
}

/// Events that can trigger message state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MessageEvent {
    /// A dispatcher's provider call returned an acknowledgement
    SendSucceeded {
        via: Channel,
        provider_ref: Option<String>,
    },
    /// A provider delivery event was resolved to this message
    ProviderReported(DeliveryOutcome),
    /// The retry queue dead-lettered the message
    RetriesExhausted,
}

impl MessageEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SendSucceeded { .. } => "send_succeeded",
            Self::ProviderReported(DeliveryOutcome::Sent) => "provider_sent",
            Self::ProviderReported(DeliveryOutcome::Delivered) => "provider_delivered",
            Self::ProviderReported(DeliveryOutcome::Bounced) => "provider_bounced",
            Self::ProviderReported(DeliveryOutcome::Rejected) => "provider_rejected",
            Self::ProviderReported(DeliveryOutcome::Complained) => "provider_complained",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }

    /// Create a send acknowledgement event
    pub fn send_succeeded(via: Channel, provider_ref: Option<String>) -> Self {
        Self::SendSucceeded { via, provider_ref }
    }
}
