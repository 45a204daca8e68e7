//! Session value objects

use crate::domain::shared::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionDirection {
    /// We placed the call
    Outgoing,
    /// The remote party invited us
    Incoming,
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// Created, not yet initiated
    Null,
    /// Invite received, waiting for the application to answer
    Incoming,
    /// Offer being generated or sent, waiting for the remote party
    OutgoingPending,
    /// Remote party accepted the session
    Accepted,
    /// Media negotiated on both sides
    Established,
    /// Session is over
    Terminated,
}

impl SessionState {
    /// Check if state transition is valid
    ///
    /// Direction-specific rules (only outgoing sessions go through the
    /// remote-answer negotiation) are enforced by the session itself.
    pub fn can_transition_to(&self, new_state: SessionState) -> bool {
        use SessionState::*;

        match (self, new_state) {
            // Can't transition from Terminated
            (Terminated, _) => false,

            (_, Terminated) => true,

            (Null, Incoming) | (Null, OutgoingPending) => true,

            (Incoming, Accepted) | (OutgoingPending, Accepted) => true,

            (Incoming, Established) | (OutgoingPending, Established) => true,
            (Accepted, Established) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Null => "null",
            SessionState::Incoming => "incoming",
            SessionState::OutgoingPending => "outgoing-pending",
            SessionState::Accepted => "accepted",
            SessionState::Established => "established",
            SessionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reason carried by the notification that moves a session to `Terminated`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The remote party reported the session terminated
    Remote(Option<String>),
    /// No remote confirmation arrived before the fallback timer fired
    TimedOut,
    /// Terminated before anything was signaled
    Local,
    /// Negotiation or transport failure
    Failed(SessionError),
}

impl TerminationReason {
    /// Error view of the reason, if it is not a normal remote termination
    pub fn error(&self) -> Option<SessionError> {
        match self {
            TerminationReason::Failed(err) => Some(err.clone()),
            TerminationReason::TimedOut => Some(SessionError::TerminationTimeout),
            TerminationReason::Remote(_) | TerminationReason::Local => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TerminationReason::Failed(_))
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Remote(Some(reason)) => f.write_str(reason),
            TerminationReason::Remote(None) => f.write_str("Terminated by remote party"),
            TerminationReason::TimedOut => write!(f, "{}", SessionError::TerminationTimeout),
            TerminationReason::Local => f.write_str("Terminated locally"),
            TerminationReason::Failed(err) => write!(f, "{}", err),
        }
    }
}
