//! Call data model
//!
//! Public types describing a call session: its identifier, direction, state
//! machine, termination reason codes and the [`CallInfo`] snapshot handed to
//! applications.
//!
//! # State machine
//!
//! ```text
//! Initial ──► Establishing ──► Established ──► Terminating ──► Terminated
//!    │             │                │                              ▲
//!    │             │                └──────────────────────────────┤
//!    │             └───────────────────────────────────────────────┤
//!    └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Terminated` is absorbing: once a session reaches it, no further
//! transition is possible and all further operations on the session fail.
//! The shortcut edges into `Terminated` cover cancellation and rejection
//! before establishment, and forced teardown on connection loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaOptions;

/// Unique identifier for a call session.
///
/// Generated once per session and never reused within a process lifetime.
pub type CallId = uuid::Uuid;

/// Direction of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Call initiated by this client
    Outgoing,
    /// Call received from a remote party
    Incoming,
}

/// State of a call session
///
/// Transition legality is encoded in [`CallState::can_transition_to`]; every
/// transition point in the crate goes through it, so an illegal edge is a bug
/// surfaced as an internal error rather than silent state corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// Session object exists but nothing has been signaled yet
    Initial,
    /// Offer sent (outgoing) or received (incoming); awaiting the answer
    Establishing,
    /// Both parties accepted; media is attached and flowing
    Established,
    /// Teardown signaled; awaiting remote acknowledgment or timeout
    Terminating,
    /// Terminal state; media released, no further transitions
    Terminated,
}

impl CallState {
    /// Whether this is the absorbing terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Terminated)
    }

    /// Whether a session in this state counts as active
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: &CallState) -> bool {
        match (self, next) {
            (CallState::Initial, CallState::Establishing) => true,
            (CallState::Initial, CallState::Terminated) => true,
            (CallState::Establishing, CallState::Established) => true,
            (CallState::Establishing, CallState::Terminating) => true,
            (CallState::Establishing, CallState::Terminated) => true,
            (CallState::Established, CallState::Terminating) => true,
            (CallState::Established, CallState::Terminated) => true,
            (CallState::Terminating, CallState::Terminated) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Initial => write!(f, "Initial"),
            CallState::Establishing => write!(f, "Establishing"),
            CallState::Established => write!(f, "Established"),
            CallState::Terminating => write!(f, "Terminating"),
            CallState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Reason a session reached `Terminated`
///
/// Carried on the terminal state-change event and recorded on the session's
/// [`CallInfo`]. Subscribers that need de-duplication key on
/// `call_id` + target state; the reason is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Local side hung up an established call
    LocalHangup,
    /// Remote side hung up
    RemoteHangup,
    /// Remote declined our offer
    RemoteRejected,
    /// Local side declined an incoming call
    Declined,
    /// Local side cancelled an outgoing call before it was answered
    Cancelled,
    /// Remote never answered or acknowledged within the configured bound
    Timeout,
    /// The signaling connection was lost
    ConnectionLost,
    /// Media acquisition or negotiation failed mid-call
    MediaFailure,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::LocalHangup => write!(f, "local hangup"),
            TerminationReason::RemoteHangup => write!(f, "remote hangup"),
            TerminationReason::RemoteRejected => write!(f, "rejected by remote"),
            TerminationReason::Declined => write!(f, "declined"),
            TerminationReason::Cancelled => write!(f, "cancelled"),
            TerminationReason::Timeout => write!(f, "timeout"),
            TerminationReason::ConnectionLost => write!(f, "connection lost"),
            TerminationReason::MediaFailure => write!(f, "media failure"),
        }
    }
}

/// Snapshot of a call session's public attributes
///
/// Returned by lookup and listing operations. This is an owned copy taken
/// under the session store's lock, not a live view; it does not change after
/// being returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInfo {
    /// Unique session identifier
    pub call_id: CallId,
    /// Current state at the time of the snapshot
    pub state: CallState,
    /// Whether the call was placed or received by this client
    pub direction: CallDirection,
    /// URI of the local party
    pub local_uri: String,
    /// URI of the remote party
    pub remote_uri: String,
    /// Display name of the remote party, when the offer carried one
    pub remote_display_name: Option<String>,
    /// Whether the call is currently on hold
    pub held: bool,
    /// Whether outbound audio is currently muted
    pub muted: bool,
    /// Media requested for this call
    pub media: MediaOptions,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session reached `Established`, if it did
    pub connected_at: Option<DateTime<Utc>>,
    /// When the session reached `Terminated`, if it did
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the session terminated, once it has
    pub termination: Option<TerminationReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_is_absorbing() {
        let all = [
            CallState::Initial,
            CallState::Establishing,
            CallState::Established,
            CallState::Terminating,
            CallState::Terminated,
        ];
        for next in &all {
            assert!(!CallState::Terminated.can_transition_to(next));
        }
    }

    #[test]
    fn every_non_terminal_state_can_reach_terminated() {
        for state in [
            CallState::Initial,
            CallState::Establishing,
            CallState::Established,
            CallState::Terminating,
        ] {
            assert!(
                state.can_transition_to(&CallState::Terminated)
                    || state.can_transition_to(&CallState::Terminating),
                "{state} has no path toward Terminated"
            );
        }
    }

    #[test]
    fn establishment_cannot_be_skipped() {
        assert!(!CallState::Initial.can_transition_to(&CallState::Established));
        assert!(!CallState::Terminating.can_transition_to(&CallState::Established));
        assert!(!CallState::Established.can_transition_to(&CallState::Establishing));
    }
}
