// Message lifecycle state machine
//
// Transitions are a pure function of (current state, event); persistence goes
// through conditional writes on the message store so duplicate and out-of-order
// events are safe to apply.

pub mod errors;
pub mod events;
pub mod guards;
pub mod message_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{GuardError, StateMachineError, StateMachineResult};
pub use events::{DeliveryOutcome, MessageEvent};
pub use guards::TransitionGuard;
pub use message_state_machine::{
    determine_transition, MessageStateMachine, NoOpReason, TransitionDecision, TransitionOutcome,
};
pub use states::MessageState;
