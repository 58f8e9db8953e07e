//! Email delivery events.
//!
//! The email provider echoes send tags under `mail.tags`, each tag value
//! being a list of strings, so the internal id is read directly from
//! `mail.tags.message_id`.

use serde_json::{json, Value};

use super::{string_at, EventInterpretation, EventInterpreter, StatusReport};
use crate::constants::email_events;
use crate::models::Channel;
use crate::state_machine::DeliveryOutcome;

#[derive(Debug, Clone, Copy, Default)]
pub struct EmailEventInterpreter;

impl EmailEventInterpreter {
    pub fn outcome_for(event_type: &str) -> Option<DeliveryOutcome> {
        match event_type {
            email_events::SEND => Some(DeliveryOutcome::Sent),
            email_events::DELIVERY => Some(DeliveryOutcome::Delivered),
            email_events::BOUNCE => Some(DeliveryOutcome::Bounced),
            email_events::REJECT | email_events::RENDERING_FAILURE => {
                Some(DeliveryOutcome::Rejected)
            }
            email_events::COMPLAINT => Some(DeliveryOutcome::Complained),
            _ => None,
        }
    }
}

impl EventInterpreter for EmailEventInterpreter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn interpret(&self, event: &Value) -> EventInterpretation {
        let Some(event_type) = string_at(event, &["/eventType", "/notificationType"]) else {
            return EventInterpretation::Ignored("email event without eventType".to_string());
        };
        let Some(outcome) = Self::outcome_for(&event_type) else {
            return EventInterpretation::Ignored(format!("email event type {event_type} carries no state"));
        };

        EventInterpretation::Status(StatusReport {
            outcome,
            provider_status: event_type,
            candidates: string_at(event, &["/mail/tags/message_id"])
                .into_iter()
                .collect(),
            alias: None,
        })
    }

    fn default_filter(&self) -> Value {
        json!({"mail": {"tags": {"message_type": ["primary"]}}})
    }
}
