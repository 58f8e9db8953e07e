//! Chat (WhatsApp-style) webhook events.
//!
//! The chat network never echoes caller metadata. Its webhook entry, which
//! may arrive serialized as a string, reports statuses keyed by the network's
//! own message id, while the envelope's `messageId` is the provider's send
//! receipt. The `accepted` status is the only event carrying both, so it is
//! used to alias the network id onto the message resolved from the receipt.

use serde_json::{json, Value};
use std::borrow::Cow;

use super::{EventInterpretation, EventInterpreter, StatusReport};
use crate::constants::chat_statuses;
use crate::models::Channel;
use crate::state_machine::DeliveryOutcome;

/// Envelope field holding the webhook entry
pub const WEBHOOK_ENTRY_FIELD: &str = "webhookEntry";

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatEventInterpreter;

impl ChatEventInterpreter {
    pub fn outcome_for(status: &str) -> Option<DeliveryOutcome> {
        match status {
            chat_statuses::ACCEPTED | chat_statuses::SENT => Some(DeliveryOutcome::Sent),
            chat_statuses::DELIVERED | chat_statuses::READ => Some(DeliveryOutcome::Delivered),
            chat_statuses::FAILED => Some(DeliveryOutcome::Rejected),
            _ => None,
        }
    }

    fn webhook_entry(event: &Value) -> Option<Cow<'_, Value>> {
        match event.get(WEBHOOK_ENTRY_FIELD)? {
            Value::String(raw) => serde_json::from_str(raw).ok().map(Cow::Owned),
            other @ Value::Object(_) => Some(Cow::Borrowed(other)),
            _ => None,
        }
    }
}

impl EventInterpreter for ChatEventInterpreter {
    fn channel(&self) -> Channel {
        Channel::Chat
    }

    fn interpret(&self, event: &Value) -> EventInterpretation {
        let Some(entry) = Self::webhook_entry(event) else {
            return EventInterpretation::Ignored("webhook entry missing or not an object".to_string());
        };

        let Some(change) = entry
            .get("changes")
            .and_then(Value::as_array)
            .and_then(|changes| {
                changes
                    .iter()
                    .find(|c| c.get("field").and_then(Value::as_str) == Some(chat_statuses::MESSAGES_FIELD))
            })
        else {
            return EventInterpretation::Ignored("webhook entry has no message changes".to_string());
        };

        let Some(status) = change.pointer("/value/statuses/0") else {
            return EventInterpretation::Ignored("message change carries no status".to_string());
        };
        let Some(provider_status) = status.get("status").and_then(Value::as_str) else {
            return EventInterpretation::Ignored("status entry without status".to_string());
        };
        let Some(outcome) = Self::outcome_for(provider_status) else {
            return EventInterpretation::Ignored(format!("chat status {provider_status} carries no state"));
        };

        let network_id = status.get("id").and_then(Value::as_str).map(str::to_string);
        let receipt = event.get("messageId").and_then(Value::as_str).map(str::to_string);
        let alias = match (&network_id, &receipt) {
            (Some(network_id), Some(_)) if provider_status == chat_statuses::ACCEPTED => {
                Some(network_id.clone())
            }
            _ => None,
        };

        EventInterpretation::Status(StatusReport {
            outcome,
            provider_status: provider_status.to_string(),
            candidates: network_id.into_iter().chain(receipt).collect(),
            alias,
        })
    }

    fn default_filter(&self) -> Value {
        json!({ WEBHOOK_ENTRY_FIELD: [{"exists": true}] })
    }
}
