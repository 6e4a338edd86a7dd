//! Event types for client operations
//!
//! Everything the core observes — connection state, registration state,
//! incoming calls, per-session state changes, and terminal failures — is
//! republished as a [`ClientEvent`]. Applications consume events either as a
//! stream from [`subscribe_events`](crate::client::SessionClient::subscribe_events)
//! or as callbacks on a [`ClientEventHandler`] registered with the client.
//!
//! Delivery is at-least-once, in the order the underlying state changes were
//! observed for any single session. Duplicate transport events can produce
//! duplicate notifications; subscribers that need exactly-once de-duplicate
//! on `call_id` plus target state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::call::{CallId, CallState};
use crate::connection::ConnectionState;
use crate::error::ClientError;
use crate::registration::RegistrationState;

/// Action to take for an incoming call
///
/// Returned by [`ClientEventHandler::on_incoming_call`]. `Ignore` leaves the
/// call in `Establishing` for the application to answer or reject explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// Answer immediately with the client's default media options
    Accept,
    /// Decline without touching local media devices
    Reject,
    /// Take no automatic action
    Ignore,
}

/// Priority attached to an event for consumer-side triage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Informational
    Low,
    /// Routine state changes
    Normal,
    /// Needs user attention (incoming call, connection loss)
    High,
    /// Subsystem is down and requires explicit recovery
    Critical,
}

/// Information about an incoming call
#[derive(Debug, Clone)]
pub struct IncomingCallInfo {
    /// Session created for the offer
    pub call_id: CallId,
    /// URI of the caller
    pub caller_uri: String,
    /// URI of the local user being called
    pub callee_uri: String,
    /// Display name of the caller, if provided
    pub caller_display_name: Option<String>,
    /// Whether the caller is offering video
    pub offers_video: bool,
    /// When the offer was received
    pub created_at: DateTime<Utc>,
}

/// Information about a call state change
#[derive(Debug, Clone)]
pub struct CallStatusInfo {
    /// Session that changed state
    pub call_id: CallId,
    /// State after the transition
    pub new_state: CallState,
    /// State before the transition, when known
    pub previous_state: Option<CallState>,
    /// Why the transition happened (termination reason, "answered", ...)
    pub reason: Option<String>,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
}

/// Information about a registration state change
#[derive(Debug, Clone)]
pub struct RegistrationStatusInfo {
    /// State after the change
    pub state: RegistrationState,
    /// Registrar the binding targets
    pub server_uri: String,
    /// Identity being bound
    pub user_uri: String,
    /// Granted lease in seconds, while registered
    pub expires: Option<u32>,
    /// Why the state changed, if noteworthy
    pub reason: Option<String>,
    /// When the change occurred
    pub timestamp: DateTime<Utc>,
}

/// Information about a connection state change
#[derive(Debug, Clone)]
pub struct ConnectionStatusInfo {
    /// State after the change
    pub state: ConnectionState,
    /// State before the change
    pub previous_state: Option<ConnectionState>,
    /// Why the state changed, if known
    pub reason: Option<String>,
    /// When the change occurred
    pub timestamp: DateTime<Utc>,
}

/// Events republished by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A remote party wants to start a call
    IncomingCall {
        /// Details of the offer
        info: IncomingCallInfo,
        /// Priority of this event
        priority: EventPriority,
    },
    /// A session changed state
    CallStateChanged {
        /// Details of the transition
        info: CallStatusInfo,
        /// Priority of this event
        priority: EventPriority,
    },
    /// The registration state changed
    RegistrationStatusChanged {
        /// Details of the change
        info: RegistrationStatusInfo,
        /// Priority of this event
        priority: EventPriority,
    },
    /// The connection state changed
    ConnectionStatusChanged {
        /// Details of the change
        info: ConnectionStatusInfo,
        /// Priority of this event
        priority: EventPriority,
    },
    /// A failure worth surfacing outside any one operation's return value
    ClientError {
        /// The error
        error: ClientError,
        /// Session the error relates to, if any
        call_id: Option<CallId>,
        /// Priority of this event
        priority: EventPriority,
    },
}

/// Callback surface for applications that prefer a handler over a stream
///
/// `on_incoming_call` decides what happens to an offer; the remaining
/// callbacks are notifications delivered in observation order by a single
/// dispatch task, so implementations may rely on per-session ordering.
#[async_trait]
pub trait ClientEventHandler: Send + Sync {
    /// Called once per incoming offer, before the application-facing
    /// notification. The returned action drives auto-answer/decline.
    async fn on_incoming_call(&self, info: IncomingCallInfo) -> CallAction;

    /// A session changed state.
    async fn on_call_state_changed(&self, info: CallStatusInfo);

    /// The registration state changed.
    async fn on_registration_state_changed(&self, info: RegistrationStatusInfo) {
        let _ = info;
    }

    /// The connection state changed.
    async fn on_connection_state_changed(&self, info: ConnectionStatusInfo) {
        let _ = info;
    }

    /// A failure was surfaced outside an operation's return value.
    async fn on_client_error(&self, error: ClientError, call_id: Option<CallId>) {
        let _ = (error, call_id);
    }
}
