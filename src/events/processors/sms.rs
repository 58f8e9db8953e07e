//! SMS delivery events.
//!
//! The SMS provider returns the send context verbatim, so the internal id is
//! read from `context.message_id`.

use serde_json::{json, Value};

use super::{string_at, EventInterpretation, EventInterpreter, StatusReport};
use crate::constants::sms_events::*;
use crate::models::Channel;
use crate::state_machine::DeliveryOutcome;

#[derive(Debug, Clone, Copy, Default)]
pub struct SmsEventInterpreter;

impl SmsEventInterpreter {
    pub fn outcome_for(event_type: &str) -> Option<DeliveryOutcome> {
        match event_type {
            TEXT_SUCCESSFUL | TEXT_QUEUED | TEXT_PENDING => Some(DeliveryOutcome::Sent),
            TEXT_DELIVERED => Some(DeliveryOutcome::Delivered),
            TEXT_BLOCKED | TEXT_SPAM | TEXT_INVALID | TEXT_INVALID_MESSAGE | TEXT_OPTED_OUT => {
                Some(DeliveryOutcome::Rejected)
            }
            TEXT_UNREACHABLE | TEXT_CARRIER_UNREACHABLE | TEXT_TTL_EXPIRED
            | TEXT_CARRIER_BLOCKED | TEXT_UNKNOWN => Some(DeliveryOutcome::Bounced),
            _ => None,
        }
    }
}

impl EventInterpreter for SmsEventInterpreter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn interpret(&self, event: &Value) -> EventInterpretation {
        let Some(event_type) = string_at(event, &["/eventType"]) else {
            return EventInterpretation::Ignored("sms event without eventType".to_string());
        };
        let Some(outcome) = Self::outcome_for(&event_type) else {
            return EventInterpretation::Ignored(format!("sms event type {event_type} carries no state"));
        };

        EventInterpretation::Status(StatusReport {
            outcome,
            provider_status: event_type,
            candidates: string_at(event, &["/context/message_id"])
                .into_iter()
                .collect(),
            alias: None,
        })
    }

    fn default_filter(&self) -> Value {
        json!({"context": {"message_type": ["primary"]}})
    }
}
