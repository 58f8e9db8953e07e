//! # Delivery Event Processing
//!
//! Provider delivery events flow through the [`EventRouter`], which matches
//! them against each subscriber's [`FilterPolicy`] and hands copies to the
//! per-channel [`ChannelEventProcessor`]s. Processors resolve the internal
//! message id (directly or through the correlation store) and apply the
//! reported outcome through the message state machine.

pub mod filter;
pub mod processors;
pub mod resolver;
pub mod router;

use std::sync::Arc;

use crate::config::RoutingConfig;
use crate::error::CourierResult;
use crate::state_machine::MessageStateMachine;
use crate::store::CorrelationStore;

pub use filter::{FilterError, FilterPolicy};
pub use processors::{
    ChannelEventProcessor, ChatEventInterpreter, EmailEventInterpreter, EventInterpretation,
    EventInterpreter, ProcessingOutcome, SmsEventInterpreter, StatusReport,
};
pub use resolver::{CorrelationResolver, DirectResolver, MessageIdResolver};
pub use router::{Delivery, EventHandler, EventRouter, RedeliveryPolicy, RouteReport, RouterHandle};

/// Router with the three channel processors subscribed.
///
/// Subscriber names are `email`, `sms` and `chat`; a policy configured under
/// the same name in `routing.filter_policies` replaces the processor's
/// built-in filter.
pub fn build_channel_router(
    state_machine: MessageStateMachine,
    correlations: Arc<dyn CorrelationStore>,
    correlation_retention: chrono::Duration,
    routing: &RoutingConfig,
) -> CourierResult<EventRouter> {
    let router = EventRouter::new().with_redelivery(routing.redelivery_policy());
    let processors = [
        ("email", ChannelEventProcessor::email(state_machine.clone())),
        ("sms", ChannelEventProcessor::sms(state_machine.clone())),
        (
            "chat",
            ChannelEventProcessor::chat(state_machine, correlations, correlation_retention),
        ),
    ];

    for (name, processor) in processors {
        let source = routing
            .filter_policies
            .get(name)
            .cloned()
            .unwrap_or_else(|| processor.default_filter());
        let policy = FilterPolicy::compile(&source)?;
        router.subscribe(name, policy, Arc::new(processor))?;
    }
    Ok(router)
}
