//! # softphone-core
//!
//! Signaling session core for VoIP clients: establishes and maintains a
//! registration with a signaling server over a persistent connection, and
//! tracks the lifecycle of the call sessions multiplexed over it —
//! origination, incoming offers, hold/mute, DTMF, and termination under
//! reconnection, cancellation and races between local actions and remote
//! events.
//!
//! The crate is a library-level contract: it defines no wire format, no
//! codecs and no NAT traversal. The two external dependencies are supplied
//! by the application behind traits:
//!
//! - [`SignalingTransport`] — the persistent connection and the protocol
//!   framing behind it, consumed as connect/send/register plus an event feed;
//! - [`MediaEngine`] — capture and negotiation of actual media, consumed as
//!   acquire/attach/hold/mute/release against opaque handles.
//!
//! # Components
//!
//! - [`ConnectionSupervisor`](connection::ConnectionSupervisor) — owns the
//!   connection state, reconnects with bounded exponential backoff.
//! - [`RegistrationManager`](registration::RegistrationManager) — binds the
//!   local identity and renews the lease before it expires.
//! - [`SessionStore`] — concurrency-safe source of truth for which calls
//!   exist; every read-modify-write is one atomic unit.
//! - Call operations on [`SessionClient`] — the per-call state machine:
//!   `Initial → Establishing → Established → Terminating → Terminated`.
//! - The event dispatcher — ordered fan-out of connection, registration and
//!   per-session state changes to subscribers and an optional handler.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use softphone_core::{
//!     ClientBuilder, ClientConfig, Identity, MediaOptions,
//!     MediaEngine, SignalingTransport, TransportEvent,
//! };
//!
//! # async fn example(
//! #     transport: Arc<dyn SignalingTransport>,
//! #     events: tokio::sync::mpsc::Receiver<TransportEvent>,
//! #     media: Arc<dyn MediaEngine>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new(
//!     Identity::new("alice", "example.com").with_credentials("alice", "secret"),
//!     "sips:edge.example.com:5061",
//! );
//!
//! let client = ClientBuilder::new(config)
//!     .with_transport(transport, events)
//!     .with_media(media)
//!     .build()?;
//!
//! client.start().await?;
//! client.connect().await?;
//! client.register().await?;
//!
//! let call_id = client
//!     .originate("sip:bob@example.com", MediaOptions::audio_only())
//!     .await?;
//!
//! let mut events = client.subscribe_events();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # let _ = call_id;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod media;
pub mod registration;
pub mod session;
pub mod transport;

pub use call::{CallDirection, CallId, CallInfo, CallState, TerminationReason};
pub use client::{ClientBuilder, ClientConfig, ClientStats, Credentials, Identity, SessionClient};
pub use connection::ConnectionState;
pub use error::{ClientError, ClientResult};
pub use events::{
    CallAction, CallStatusInfo, ClientEvent, ClientEventHandler, ConnectionStatusInfo,
    EventPriority, IncomingCallInfo, RegistrationStatusInfo,
};
pub use media::{MediaEngine, MediaError, MediaHandle, MediaOptions};
pub use registration::{RegistrationBinding, RegistrationState};
pub use session::SessionStore;
pub use transport::{
    DisconnectReason, IncomingOffer, SessionSignal, SignalMessage, SignalingTransport,
    TransportError, TransportEvent,
};
