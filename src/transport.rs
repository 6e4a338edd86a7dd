//! Signaling transport seam
//!
//! The persistent connection to the signaling server is consumed behind the
//! [`SignalingTransport`] trait: a connect/disconnect/send surface plus a
//! registrar exchange, with unsolicited events delivered on an
//! [`mpsc`](tokio::sync::mpsc) channel handed to the client at construction.
//! Wire syntax, framing and authentication challenges all live behind this
//! seam; the session core only sees typed messages and events.

use async_trait::async_trait;

use crate::call::CallId;
use crate::client::config::Credentials;
use crate::media::MediaOptions;
use crate::registration::RegistrationBinding;

/// Failure reported by the transport collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// No connection is currently open
    #[error("transport is not connected")]
    NotConnected,
    /// The connection attempt failed
    #[error("connect failed: {reason}")]
    ConnectFailed {
        /// Description from the transport layer
        reason: String,
    },
    /// An outbound message could not be delivered
    #[error("send failed: {reason}")]
    SendFailed {
        /// Description from the transport layer
        reason: String,
    },
    /// The server refused the request (authentication, policy)
    #[error("request rejected: {reason}")]
    Rejected {
        /// Server-supplied reason
        reason: String,
    },
    /// The server did not respond in time
    #[error("transport request timed out")]
    Timeout,
}

/// Outbound call signaling, opaque to this crate
///
/// The transport turns these into whatever its protocol requires. The
/// `call_id` correlates the message with a session on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// Invite the target into a new call
    Offer {
        /// Session the offer opens
        call_id: CallId,
        /// URI of the callee
        target: String,
        /// Media the caller wants to negotiate
        media: MediaOptions,
    },
    /// Accept an incoming offer
    Answer {
        /// Session being accepted
        call_id: CallId,
    },
    /// Decline an incoming offer
    Reject {
        /// Session being declined
        call_id: CallId,
    },
    /// Withdraw our own offer before it is answered
    Cancel {
        /// Session being cancelled
        call_id: CallId,
    },
    /// Terminate an established call
    Bye {
        /// Session being terminated
        call_id: CallId,
    },
    /// Out-of-band digit signaling on an established call
    Dtmf {
        /// Session carrying the digits
        call_id: CallId,
        /// Validated digit string (0-9, *, #, A-D)
        digits: String,
    },
}

/// Why the transport connection closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local side asked for the disconnect
    Requested,
    /// The server closed the connection
    RemoteClosed,
    /// The connection broke
    Error {
        /// Description from the transport layer
        details: String,
    },
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "requested"),
            DisconnectReason::RemoteClosed => write!(f, "closed by remote"),
            DisconnectReason::Error { details } => write!(f, "error: {details}"),
        }
    }
}

/// An inbound call offer delivered by the transport
///
/// The transport assigns the `call_id` when the offer arrives, so that later
/// [`TransportEvent::SessionSignal`]s for the same dialog correlate with the
/// session the core creates from this offer.
#[derive(Debug, Clone)]
pub struct IncomingOffer {
    /// Transport-assigned session id, unique for the process lifetime
    pub call_id: CallId,
    /// URI of the caller
    pub caller_uri: String,
    /// Display name of the caller, if the offer carried one
    pub caller_display_name: Option<String>,
    /// Media the caller is offering
    pub media: MediaOptions,
}

/// A mid-session signal from the remote party
#[derive(Debug, Clone)]
pub enum SessionSignal {
    /// The remote accepted our offer
    Accepted,
    /// The remote declined our offer
    Rejected {
        /// Reason reported by the remote, if any
        reason: Option<String>,
    },
    /// The remote terminated the session (hangup or negotiation failure)
    Terminated {
        /// Reason reported by the remote, if any
        reason: Option<String>,
    },
    /// The remote acknowledged our cancel/bye
    TerminateAck,
}

/// Unsolicited events emitted by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection is up
    Connected,
    /// The connection closed
    Disconnected {
        /// Why it closed
        reason: DisconnectReason,
    },
    /// A remote party wants to start a call
    IncomingOffer(IncomingOffer),
    /// A signal scoped to an existing session
    SessionSignal {
        /// Session the signal belongs to
        call_id: CallId,
        /// The signal itself
        signal: SessionSignal,
    },
}

/// Transport collaborator consumed by the session core
///
/// `register`/`unregister` own the registrar round-trip (including any
/// authentication challenge) and report the granted lease; call signaling is
/// fire-and-forget through `send` with responses arriving as
/// [`TransportEvent`]s.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open the persistent connection to the signaling server.
    async fn connect(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransportError>;

    /// Close the connection. The transport emits a
    /// [`TransportEvent::Disconnected`] with [`DisconnectReason::Requested`].
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send one call-signaling message.
    async fn send(&self, message: SignalMessage) -> Result<(), TransportError>;

    /// Perform the registrar exchange; returns the granted lease in seconds.
    async fn register(&self, binding: &RegistrationBinding) -> Result<u32, TransportError>;

    /// Remove the registrar binding.
    async fn unregister(&self) -> Result<(), TransportError>;
}
