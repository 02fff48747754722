//! Call state machine implementation.
//!
//! The five-state wire vocabulary ([`CallStatus`]) is enforced locally as a
//! monotonic machine: `Offering → Answered → Connected → Ended`, with the
//! alternate terminal `Rejected` reachable only from `Offering`. No state is
//! re-enterable and terminal states absorb nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::call::CallStatus;

/// Current phase of a call, with the timestamps the UI renders.
#[derive(Debug, Clone, Serialize)]
pub enum CallPhase {
    /// Offer created (or being created); waiting for the callee.
    Offering { since: DateTime<Utc> },
    /// Answer stored; transport negotiation in progress.
    Answered { answered_at: DateTime<Utc> },
    /// A candidate pair succeeded; media is flowing.
    Connected { connected_at: DateTime<Utc> },
    /// Terminal: hung up, cancelled, or torn down after a fault.
    Ended {
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
    /// Terminal: declined by the callee without answering.
    Rejected { rejected_at: DateTime<Utc> },
}

impl CallPhase {
    pub fn offering() -> Self {
        Self::Offering { since: Utc::now() }
    }

    pub fn status(&self) -> CallStatus {
        match self {
            Self::Offering { .. } => CallStatus::Offering,
            Self::Answered { .. } => CallStatus::Answered,
            Self::Connected { .. } => CallStatus::Connected,
            Self::Ended { .. } => CallStatus::Ended,
            Self::Rejected { .. } => CallStatus::Rejected,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended { .. } | Self::Rejected { .. })
    }

    /// Apply a transition. Returns an error if the transition is not legal
    /// from the current phase.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let next = match (&*self, transition) {
            (Self::Offering { .. }, CallTransition::Answer) => Self::Answered {
                answered_at: Utc::now(),
            },
            (Self::Answered { .. }, CallTransition::Connect) => Self::Connected {
                connected_at: Utc::now(),
            },
            (Self::Offering { .. } | Self::Answered { .. }, CallTransition::End) => Self::Ended {
                ended_at: Utc::now(),
                duration_secs: None,
            },
            (Self::Connected { connected_at }, CallTransition::End) => {
                let duration = Utc::now().signed_duration_since(*connected_at).num_seconds();
                Self::Ended {
                    ended_at: Utc::now(),
                    duration_secs: Some(duration),
                }
            }
            (Self::Offering { .. }, CallTransition::Reject) => Self::Rejected {
                rejected_at: Utc::now(),
            },
            (current, attempted) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", attempted),
                });
            }
        };
        *self = next;
        Ok(())
    }
}

/// State transitions for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    Answer,
    Connect,
    End,
    Reject,
}

impl CallTransition {
    /// The transition that would move a call toward `status`, if one
    /// exists. `Offering` is the entry state and is never a target.
    pub fn toward(status: CallStatus) -> Option<Self> {
        match status {
            CallStatus::Offering => None,
            CallStatus::Answered => Some(Self::Answer),
            CallStatus::Connected => Some(Self::Connect),
            CallStatus::Ended => Some(Self::End),
            CallStatus::Rejected => Some(Self::Reject),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
