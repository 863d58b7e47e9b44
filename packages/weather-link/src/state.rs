// Connection lifecycle state machine
//
// Pure bookkeeping: no I/O, no timers. The connection manager feeds it events
// and publishes whatever transition comes back.

use crate::error::StateError;
use crate::types::ConnectionState;

/// Inputs that drive the connection lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    Connect,
    TransportOpened,
    OpenFailed(String),
    StreamError(String),
    Disconnect,
}

impl StateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::Connect => "connect",
            StateEvent::TransportOpened => "transport_opened",
            StateEvent::OpenFailed(_) => "open_failed",
            StateEvent::StreamError(_) => "stream_error",
            StateEvent::Disconnect => "disconnect",
        }
    }
}

/// Outcome of applying a legal event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Legal but no-op (disconnecting while already disconnected)
    Unchanged,
}

#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Apply an event. Illegal events leave the state untouched.
    pub fn apply(&mut self, event: StateEvent) -> Result<Transition, StateError> {
        let next = match next_state(&self.state, &event) {
            Some(next) => next,
            None => {
                return Err(StateError::IllegalTransition {
                    from: self.state.clone(),
                    event: event.name(),
                })
            }
        };

        if next == self.state {
            return Ok(Transition::Unchanged);
        }

        let from = std::mem::replace(&mut self.state, next.clone());
        log::debug!("Connection state {} -> {}", from, next);
        Ok(Transition::Changed { from, to: next })
    }
}

/// Transition table. `None` means the event is illegal in `state`.
pub fn next_state(state: &ConnectionState, event: &StateEvent) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (state, event) {
        (_, StateEvent::Disconnect) => Some(Disconnected),
        (Disconnected, StateEvent::Connect) | (Failed { .. }, StateEvent::Connect) => {
            Some(Connecting)
        }
        (Connecting, StateEvent::TransportOpened) => Some(Connected),
        (Connecting, StateEvent::OpenFailed(reason)) => Some(Failed {
            reason: reason.clone(),
        }),
        (Connected, StateEvent::StreamError(reason)) => Some(Failed {
            reason: reason.clone(),
        }),
        _ => None,
    }
}
