//! Lifecycle state machine for knowledge artifacts
//!
//! Each lifecycle operation is an event against the root artifact's status:
//! - Valid states (`draft`, `active`, `retired`, plus the terminal `removed`)
//! - Events that trigger transitions
//! - Terminal states
//!
//! `removed` is never stored; withdrawn and deleted artifacts no longer exist.

use chrono::{DateTime, NaiveDate, Utc};
pub use crmi_common::state::StateError;

use crate::entities::ArtifactStatus;

/// Lifecycle states of a knowledge artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Draft,
    Active,
    Retired,
    Unknown,
    Removed,
}

impl LifecycleState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Get all valid next states from current state
    pub fn valid_transitions(&self) -> &'static [LifecycleState] {
        match self {
            Self::Draft => &[Self::Draft, Self::Active, Self::Removed],
            Self::Active => &[Self::Active, Self::Draft, Self::Retired],
            Self::Retired => &[Self::Retired, Self::Removed],
            Self::Unknown => &[Self::Unknown],
            Self::Removed => &[],
        }
    }

    /// Stored status for this state; `None` once removed
    pub fn as_status(&self) -> Option<ArtifactStatus> {
        match self {
            Self::Draft => Some(ArtifactStatus::Draft),
            Self::Active => Some(ArtifactStatus::Active),
            Self::Retired => Some(ArtifactStatus::Retired),
            Self::Unknown => Some(ArtifactStatus::Unknown),
            Self::Removed => None,
        }
    }
}

impl From<ArtifactStatus> for LifecycleState {
    fn from(status: ArtifactStatus) -> Self {
        match status {
            ArtifactStatus::Draft => Self::Draft,
            ArtifactStatus::Active => Self::Active,
            ArtifactStatus::Retired => Self::Retired,
            ArtifactStatus::Unknown => Self::Unknown,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Retired => write!(f, "retired"),
            Self::Unknown => write!(f, "unknown"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Lifecycle operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Record approval metadata; status unchanged
    Approve,
    /// Create a new draft version from an active artifact
    Draft,
    /// Publish a draft
    Release,
    /// Take an active artifact out of use
    Retire,
    /// Discard a draft
    Withdraw,
    /// Remove a retired artifact
    Delete,
}

impl LifecycleEvent {
    /// Status the root artifact must have, if the event has a precondition
    pub fn required_state(&self) -> Option<LifecycleState> {
        match self {
            Self::Approve => None,
            Self::Draft | Self::Retire => Some(LifecycleState::Active),
            Self::Release | Self::Withdraw => Some(LifecycleState::Draft),
            Self::Delete => Some(LifecycleState::Retired),
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Draft => write!(f, "draft"),
            Self::Release => write!(f, "release"),
            Self::Retire => write!(f, "retire"),
            Self::Withdraw => write!(f, "withdraw"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Artifact lifecycle state machine
pub struct ArtifactStateMachine;

impl ArtifactStateMachine {
    /// Attempt a state transition
    ///
    /// Returns the state the artifact produced by the event ends up in. For `Draft`
    /// that is the new draft copy; the active source is left untouched.
    pub fn transition(
        current: LifecycleState,
        event: LifecycleEvent,
    ) -> Result<LifecycleState, StateError> {
        if current.is_terminal() {
            return Err(StateError::TerminalState(current.to_string()));
        }

        let next = match (&current, &event) {
            (_, LifecycleEvent::Approve) => current,

            // From Active
            (LifecycleState::Active, LifecycleEvent::Draft) => LifecycleState::Draft,
            (LifecycleState::Active, LifecycleEvent::Retire) => LifecycleState::Retired,

            // From Draft
            (LifecycleState::Draft, LifecycleEvent::Release) => LifecycleState::Active,
            (LifecycleState::Draft, LifecycleEvent::Withdraw) => LifecycleState::Removed,

            // From Retired
            (LifecycleState::Retired, LifecycleEvent::Delete) => LifecycleState::Removed,

            // Invalid transitions
            _ => {
                return Err(StateError::InvalidTransition {
                    from: current.to_string(),
                    expected: event
                        .required_state()
                        .map_or_else(|| "any".to_string(), |s| s.to_string()),
                    event: event.to_string(),
                });
            }
        };

        Ok(next)
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition(current: LifecycleState, event: LifecycleEvent) -> bool {
        Self::transition(current, event).is_ok()
    }

    /// Transition starting from a stored status
    pub fn apply(status: ArtifactStatus, event: LifecycleEvent) -> Result<LifecycleState, StateError> {
        Self::transition(status.into(), event)
    }

    /// Guards a draft must pass before it can be released
    ///
    /// The artifact needs a last-modified date and an approval date, and the approval
    /// must not predate the last modification.
    pub fn release_guard(
        date: Option<DateTime<Utc>>,
        approval_date: Option<NaiveDate>,
    ) -> Result<(), StateError> {
        let date = date.ok_or_else(|| {
            StateError::GuardFailed("the artifact must have a date to be released".to_string())
        })?;
        let approval_date = approval_date.ok_or_else(|| {
            StateError::GuardFailed(
                "the artifact must be approved (approvalDate) before it is released".to_string(),
            )
        })?;
        if approval_date < date.date_naive() {
            return Err(StateError::GuardFailed(format!(
                "the artifact was modified ({}) after it was approved ({})",
                date.date_naive(),
                approval_date
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
