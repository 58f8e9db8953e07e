//! # Channel Event Processors
//!
//! One processor per channel. A processor interprets the provider's event
//! shape, resolves the internal message id through the channel's resolver,
//! and applies the reported outcome through the state machine.
//!
//! Interpretation is channel specific ([`EventInterpreter`]); resolution and
//! state application are shared by every channel.

pub mod chat;
pub mod email;
pub mod sms;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::resolver::{CorrelationResolver, DirectResolver, MessageIdResolver};
use super::router::EventHandler;
use crate::error::CourierResult;
use crate::logging::log_event_operation;
use crate::models::{Channel, CorrelationRecord, MessageId};
use crate::state_machine::{
    DeliveryOutcome, MessageEvent, MessageState, MessageStateMachine, NoOpReason,
    StateMachineError, TransitionOutcome,
};
use crate::store::{CorrelationStore, StoreError};

pub use chat::ChatEventInterpreter;
pub use email::EmailEventInterpreter;
pub use sms::SmsEventInterpreter;

/// What a processor did with one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Applied {
        message_id: MessageId,
        from: MessageState,
        to: MessageState,
    },
    /// Duplicate, stale or out-of-order event; the record was left as is
    NoOp {
        message_id: MessageId,
        state: MessageState,
        reason: NoOpReason,
    },
    /// The event carries nothing this processor acts on
    Ignored { reason: String },
    /// No message could be found for the event; it is dropped
    Unresolved { identifiers: Vec<String> },
}

impl ProcessingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::NoOp { .. } => "no_op",
            Self::Ignored { .. } => "ignored",
            Self::Unresolved { .. } => "unresolved",
        }
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Applied { message_id, .. } | Self::NoOp { message_id, .. } => Some(message_id),
            _ => None,
        }
    }
}

/// Delivery status extracted from a provider event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub outcome: DeliveryOutcome,
    /// Provider status string as it appeared in the event
    pub provider_status: String,
    /// Identifiers to resolve, most specific first
    pub candidates: Vec<String>,
    /// Provider id to map onto the resolved message for later events
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventInterpretation {
    Status(StatusReport),
    Ignored(String),
}

/// Channel-specific reading of a provider event
pub trait EventInterpreter: Send + Sync {
    fn channel(&self) -> Channel;

    fn interpret(&self, event: &Value) -> EventInterpretation;

    /// Subscription filter this channel's processor registers with
    fn default_filter(&self) -> Value;
}

struct AliasWriter {
    store: Arc<dyn CorrelationStore>,
    retention: chrono::Duration,
}

pub struct ChannelEventProcessor {
    name: String,
    interpreter: Arc<dyn EventInterpreter>,
    resolver: Arc<dyn MessageIdResolver>,
    state_machine: MessageStateMachine,
    aliases: Option<AliasWriter>,
}

impl std::fmt::Debug for ChannelEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEventProcessor")
            .field("name", &self.name)
            .field("channel", &self.interpreter.channel())
            .field("resolver", &self.resolver.strategy())
            .field("records_aliases", &self.aliases.is_some())
            .finish()
    }
}

impl ChannelEventProcessor {
    pub fn new(
        interpreter: Arc<dyn EventInterpreter>,
        resolver: Arc<dyn MessageIdResolver>,
        state_machine: MessageStateMachine,
    ) -> Self {
        Self {
            name: format!("{}_event_processor", interpreter.channel()),
            interpreter,
            resolver,
            state_machine,
            aliases: None,
        }
    }

    /// Record alias correlations reported by the interpreter
    pub fn with_aliases(
        mut self,
        store: Arc<dyn CorrelationStore>,
        retention: chrono::Duration,
    ) -> Self {
        self.aliases = Some(AliasWriter { store, retention });
        self
    }

    pub fn email(state_machine: MessageStateMachine) -> Self {
        Self::new(
            Arc::new(EmailEventInterpreter),
            Arc::new(DirectResolver),
            state_machine,
        )
    }

    pub fn sms(state_machine: MessageStateMachine) -> Self {
        Self::new(
            Arc::new(SmsEventInterpreter),
            Arc::new(DirectResolver),
            state_machine,
        )
    }

    pub fn chat(
        state_machine: MessageStateMachine,
        correlations: Arc<dyn CorrelationStore>,
        retention: chrono::Duration,
    ) -> Self {
        Self::new(
            Arc::new(ChatEventInterpreter),
            Arc::new(CorrelationResolver::new(correlations.clone())),
            state_machine,
        )
        .with_aliases(correlations, retention)
    }

    pub fn channel(&self) -> Channel {
        self.interpreter.channel()
    }

    pub fn default_filter(&self) -> Value {
        self.interpreter.default_filter()
    }

    pub async fn process(&self, event: &Value) -> CourierResult<ProcessingOutcome> {
        let report = match self.interpreter.interpret(event) {
            EventInterpretation::Status(report) => report,
            EventInterpretation::Ignored(reason) => {
                debug!(processor = %self.name, reason = %reason, "Event ignored");
                return Ok(ProcessingOutcome::Ignored { reason });
            }
        };

        let Some(message_id) = self.resolver.resolve(&report.candidates).await? else {
            return Ok(self.unresolved(report));
        };

        self.record_alias(&report, &message_id).await?;

        let event = MessageEvent::ProviderReported(report.outcome);
        let outcome = match self.state_machine.apply(&message_id, event).await {
            Ok(TransitionOutcome::Applied { from, to, .. }) => ProcessingOutcome::Applied {
                message_id,
                from,
                to,
            },
            Ok(TransitionOutcome::NoOp { state, reason }) => ProcessingOutcome::NoOp {
                message_id,
                state,
                reason,
            },
            Err(StateMachineError::MessageNotFound { .. }) => {
                return Ok(self.unresolved(StatusReport {
                    candidates: vec![message_id.to_string()],
                    ..report
                }));
            }
            Err(e) => return Err(e.into()),
        };

        log_event_operation(
            &self.name,
            outcome.label(),
            outcome.message_id(),
            Some(&report.provider_status),
        );
        Ok(outcome)
    }

    fn unresolved(&self, report: StatusReport) -> ProcessingOutcome {
        warn!(
            processor = %self.name,
            resolver = self.resolver.strategy(),
            identifiers = ?report.candidates,
            provider_status = %report.provider_status,
            "⚠️ Event could not be resolved to a message, dropping"
        );
        ProcessingOutcome::Unresolved {
            identifiers: report.candidates,
        }
    }

    async fn record_alias(&self, report: &StatusReport, message_id: &MessageId) -> CourierResult<()> {
        let (Some(writer), Some(alias)) = (&self.aliases, &report.alias) else {
            return Ok(());
        };

        let record = CorrelationRecord::new(
            alias.clone(),
            message_id.clone(),
            self.interpreter.channel(),
            writer.retention,
        );
        match writer.store.put(record).await {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict { key, reason }) => {
                warn!(processor = %self.name, provider_message_id = %key, reason = %reason, "Alias conflicts with an existing correlation");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventHandler for ChannelEventProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Value) -> CourierResult<ProcessingOutcome> {
        self.process(event).await
    }
}

/// First string at any of `pointers`, unwrapping single-element arrays
pub(crate) fn string_at(event: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|pointer| match event.pointer(pointer)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first()?.as_str().map(str::to_string),
        _ => None,
    })
}
