use super::errors::{GuardError, GuardResult};
use super::states::MessageState;

/// Validates that a computed transition respects lifecycle monotonicity
///
/// Ordering is `Queued < Sent < {terminal states}`; a transition may only move
/// forward, and nothing leaves a terminal state.
pub struct TransitionGuard;

impl TransitionGuard {
    pub fn can_transition(from: MessageState, to: MessageState) -> GuardResult<()> {
        if from.is_terminal() {
            return Err(GuardError::TerminalState {
                state: from.to_string(),
            });
        }

        if Self::rank(to) <= Self::rank(from) {
            return Err(GuardError::BackwardTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        Ok(())
    }

    fn rank(state: MessageState) -> u8 {
        match state {
            MessageState::Queued => 0,
            MessageState::Sent => 1,
            _ => 2,
        }
    }
}
