use courier_core::models::Channel;
use courier_core::state_machine::{DeliveryOutcome, MessageEvent, MessageState};
use proptest::prelude::*;

pub fn channel_strategy() -> impl Strategy<Value = Channel> {
    prop_oneof![Just(Channel::Email), Just(Channel::Sms), Just(Channel::Chat)]
}

pub fn outcome_strategy() -> impl Strategy<Value = DeliveryOutcome> {
    prop_oneof![
        Just(DeliveryOutcome::Sent),
        Just(DeliveryOutcome::Delivered),
        Just(DeliveryOutcome::Bounced),
        Just(DeliveryOutcome::Rejected),
        Just(DeliveryOutcome::Complained),
    ]
}

pub fn event_strategy() -> impl Strategy<Value = MessageEvent> {
    prop_oneof![
        (channel_strategy(), prop::option::of("[a-z0-9]{4,12}"))
            .prop_map(|(via, provider_ref)| MessageEvent::send_succeeded(via, provider_ref)),
        outcome_strategy().prop_map(MessageEvent::ProviderReported),
        Just(MessageEvent::RetriesExhausted),
    ]
}

pub fn state_strategy() -> impl Strategy<Value = MessageState> {
    prop_oneof![
        Just(MessageState::Queued),
        Just(MessageState::Sent),
        Just(MessageState::Delivered),
        Just(MessageState::Bounced),
        Just(MessageState::Rejected),
        Just(MessageState::Complained),
        Just(MessageState::Failed),
    ]
}

/// Position in the lifecycle; transitions never decrease it
pub fn rank(state: MessageState) -> u8 {
    match state {
        MessageState::Queued => 0,
        MessageState::Sent => 1,
        _ => 2,
    }
}
