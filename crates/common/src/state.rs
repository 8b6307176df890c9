//! Common state machine error types
//!
//! Shared by the lifecycle state machine and the operations that drive it.

use thiserror::Error;

/// Errors that can occur during state transitions
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Invalid transition: cannot {event} an artifact with status '{from}'; expected '{expected}'")]
    InvalidTransition {
        from: String,
        expected: String,
        event: String,
    },

    #[error("Guard condition failed: {0}")]
    GuardFailed(String),

    #[error("Terminal state: {0} is a terminal state and cannot transition")]
    TerminalState(String),
}

impl From<StateError> for crate::Error {
    fn from(err: StateError) -> Self {
        crate::Error::PreconditionFailed(err.to_string())
    }
}
