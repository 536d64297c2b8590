//! Session state machine

use serde::Serialize;
use std::fmt;

use crate::error::SessionError;

/// Lifecycle state of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    /// Transient: resolved back to `Open` by the same handler
    Interrupted,
    Closed,
    Failed,
}

impl SessionState {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open | SessionState::Interrupted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Interrupted => "interrupted",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Connect,
    /// Setup exchange completed
    TransportOpen,
    /// Handshake failure, timeout, or mid-session connection loss
    TransportError,
    /// Microphone or speaker could not be acquired
    DeviceError,
    /// Remote side closed an open session
    RemoteClose,
    Interruption,
    /// Interruption handled; playback re-armed
    Resume,
    Disconnect,
}

/// Enforces the legal transitions between [`SessionState`]s
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Target state for `trigger` from `from`, if the edge exists
    pub fn next(from: SessionState, trigger: Trigger) -> Option<SessionState> {
        use SessionState::*;
        use Trigger::*;

        match (from, trigger) {
            (Idle, Connect) => Some(Connecting),
            (Connecting, TransportOpen) => Some(Open),
            (Connecting, TransportError) => Some(Failed),
            (Open, Interruption) => Some(Interrupted),
            (Interrupted, Resume) => Some(Open),
            (Connecting, DeviceError) => Some(Failed),
            (Open | Interrupted, TransportError | DeviceError) => Some(Failed),
            (Open | Interrupted, RemoteClose) => Some(Closed),
            (Idle | Connecting | Open | Interrupted | Failed, Disconnect) => Some(Closed),
            _ => None,
        }
    }

    /// Apply `trigger`, returning the new state
    pub fn apply(&mut self, trigger: Trigger) -> Result<SessionState, SessionError> {
        match Self::next(self.state, trigger) {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => Err(SessionError::InvalidTransition {
                from: self.state,
                trigger,
            }),
        }
    }
}
