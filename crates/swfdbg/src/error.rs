use std::time::Duration;

use swfdbg_wire::WireError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::events::FaultEvent;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to a player")]
    NotConnected,
    #[error("player is not suspended")]
    NotSuspended,
    #[error("player is already suspended")]
    AlreadySuspended,
    #[error("player did not respond within {timeout:?}")]
    NoResponse { timeout: Duration },
    #[error("player does not speak this protocol revision")]
    VersionMismatch,
    #[error("not supported by this player: {0}")]
    NotSupported(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("connection to the player is broken")]
    BrokenPipe,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Maps a send failure onto the session's vocabulary; a closed writer is
    /// reported the same way as a session that was never bound.
    pub(crate) fn from_send(err: WireError) -> Self {
        match err {
            WireError::NotConnected => Self::NotConnected,
            WireError::BrokenPipe => Self::BrokenPipe,
            WireError::MalformedMessage(msg) => Self::MalformedMessage(msg),
            other => Self::Wire(other),
        }
    }

    pub(crate) fn no_response(timeout: Duration) -> Self {
        Self::NoResponse { timeout }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Outcome of an operation that runs code inside the player.
///
/// A fault raised by that code is data about the debuggee, not a failure of
/// the debugger, so it is returned rather than propagated.
#[derive(Clone, Debug, PartialEq)]
pub enum Evaluation<T> {
    Ok(T),
    Fault(FaultEvent),
}

impl<T> Evaluation<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Fault(_) => None,
        }
    }

    pub fn fault(&self) -> Option<&FaultEvent> {
        match self {
            Self::Ok(_) => None,
            Self::Fault(fault) => Some(fault),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Evaluation<U> {
        match self {
            Self::Ok(value) => Evaluation::Ok(f(value)),
            Self::Fault(fault) => Evaluation::Fault(fault),
        }
    }
}
