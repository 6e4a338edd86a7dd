//! Error types for the signaling session core
//!
//! All fallible operations in this crate return [`ClientResult`]. Precondition
//! violations (wrong connection/registration/session state) are returned
//! synchronously from the violating call; remote-origin failures (rejection,
//! timeouts, mid-call media loss) are never returned from an operation — they
//! surface through the event dispatcher as a session transition to
//! `Terminated` carrying a reason.

use crate::call::{CallId, CallState};

/// Result type for all client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during client operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Operation requires an active connection to the signaling server
    #[error("Not connected to the signaling server")]
    NotConnected,

    /// Operation requires an active registration
    #[error("Not registered with the signaling server")]
    NotRegistered,

    /// No session exists with the given id
    #[error("Session not found: {call_id}")]
    SessionNotFound {
        /// The unknown session id
        call_id: CallId,
    },

    /// The operation is not valid from the session's current state
    #[error("Operation not valid for session {call_id} in state {state}")]
    InvalidSessionState {
        /// The session the operation targeted
        call_id: CallId,
        /// The state the session was actually in
        state: CallState,
    },

    /// The session has already reached its terminal state
    #[error("Session {call_id} has already ended")]
    SessionEnded {
        /// The terminated session
        call_id: CallId,
    },

    /// Local media resources could not be acquired
    #[error("Media acquisition failed: {reason}")]
    MediaAcquisitionFailed {
        /// Description of the acquisition failure
        reason: String,
    },

    /// An operation on already-acquired media failed
    #[error("Media operation failed: {reason}")]
    MediaFailure {
        /// Description of the failure
        reason: String,
    },

    /// The remote party rejected the call
    #[error("Call rejected by remote party: {reason}")]
    RemoteRejected {
        /// Rejection reason reported by the remote
        reason: String,
    },

    /// The remote did not acknowledge within the configured bound
    #[error("Timed out waiting for {operation}")]
    Timeout {
        /// The operation that timed out
        operation: String,
    },

    /// A transport-level failure (connect, send) that may be transient
    #[error("Network error: {reason}")]
    NetworkError {
        /// Description of the network failure
        reason: String,
    },

    /// The registrar refused or failed the registration
    #[error("Registration failed: {reason}")]
    RegistrationFailed {
        /// Description of the registration failure
        reason: String,
    },

    /// Reconnection attempts are exhausted; explicit reconnect required
    #[error("Connection failed after {attempts} attempts: {reason}")]
    ConnectionFailed {
        /// Number of attempts made before giving up
        attempts: u32,
        /// Description of the final failure
        reason: String,
    },

    /// The concurrent call limit would be exceeded
    #[error("Too many active calls ({active} of {limit})")]
    TooManyCalls {
        /// Currently active (non-terminal) calls
        active: usize,
        /// Configured maximum
        limit: usize,
    },

    /// The supplied DTMF string contains characters outside 0-9, *, #, A-D
    #[error("Invalid DTMF digits: {digits:?}")]
    InvalidDigits {
        /// The rejected digit string
        digits: String,
    },

    /// A configuration field failed validation
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// The offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// An unexpected internal error
    #[error("Internal error: {message}")]
    InternalError {
        /// Description of the failure
        message: String,
    },
}

impl ClientError {
    /// Whether retrying the failed operation can reasonably succeed.
    ///
    /// Used by [`retry_with_backoff`](crate::client::recovery::retry_with_backoff)
    /// to decide between another attempt and giving up immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::NetworkError { .. } | ClientError::Timeout { .. }
        )
    }

    /// Coarse category for structured logging and diagnostics
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::NotConnected
            | ClientError::NetworkError { .. }
            | ClientError::ConnectionFailed { .. } => "connection",
            ClientError::NotRegistered | ClientError::RegistrationFailed { .. } => "registration",
            ClientError::SessionNotFound { .. }
            | ClientError::InvalidSessionState { .. }
            | ClientError::SessionEnded { .. }
            | ClientError::TooManyCalls { .. } => "session",
            ClientError::MediaAcquisitionFailed { .. } | ClientError::MediaFailure { .. } => {
                "media"
            }
            ClientError::RemoteRejected { .. }
            | ClientError::Timeout { .. }
            | ClientError::InvalidDigits { .. } => "protocol",
            ClientError::InvalidConfiguration { .. } | ClientError::InternalError { .. } => {
                "internal"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn recoverability_follows_error_origin() {
        assert!(ClientError::NetworkError { reason: "connection reset".into() }.is_recoverable());
        assert!(ClientError::Timeout { operation: "register".into() }.is_recoverable());

        assert!(!ClientError::NotConnected.is_recoverable());
        assert!(!ClientError::NotRegistered.is_recoverable());
        assert!(!ClientError::SessionNotFound { call_id: Uuid::new_v4() }.is_recoverable());
        assert!(!ClientError::RegistrationFailed { reason: "403".into() }.is_recoverable());
    }

    #[test]
    fn categories_cover_the_taxonomy() {
        assert_eq!(ClientError::NotConnected.category(), "connection");
        assert_eq!(ClientError::NotRegistered.category(), "registration");
        assert_eq!(
            ClientError::SessionEnded { call_id: Uuid::new_v4() }.category(),
            "session"
        );
        assert_eq!(
            ClientError::MediaAcquisitionFailed { reason: "no device".into() }.category(),
            "media"
        );
        assert_eq!(
            ClientError::RemoteRejected { reason: "busy".into() }.category(),
            "protocol"
        );
    }
}
