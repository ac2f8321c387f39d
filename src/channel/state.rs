use crate::error::{PulseError, Result};
use crate::types::ConnectionState;

pub struct ConnectionStateMachine;

impl ConnectionStateMachine {
    pub fn allows(from: ConnectionState, to: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (from, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Connecting)
                | (Error, Disconnected)
        )
    }

    /// Moves `current` to `next`. Returns `Ok(false)` when already there.
    pub fn transition(current: &mut ConnectionState, next: ConnectionState) -> Result<bool> {
        if *current == next {
            return Ok(false);
        }

        if !Self::allows(*current, next) {
            return Err(PulseError::InvalidTransition {
                from: *current,
                to: next,
            });
        }

        *current = next;
        Ok(true)
    }
}
