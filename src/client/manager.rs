//! Client manager
//!
//! [`SessionClient`] is the composition root and primary entry point: it
//! owns the connection supervisor, registration manager, session store and
//! event dispatcher, and exposes the full operation surface — connection and
//! registration control, call origination and handling, and event
//! subscription.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │   Application / UI      │
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐
//! │     SessionClient       │ ◄── This layer
//! │ ┌─────────────────────┐ │
//! │ │ Connection Superv.  │ │  • connect / reconnect / backoff
//! │ │ Registration Mgr    │ │  • registrar binding + renewal
//! │ │ Session Store       │ │  • call lifecycle bookkeeping
//! │ │ Event Dispatcher    │ │  • ordered fan-out
//! │ └─────────────────────┘ │
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐
//! │ SignalingTransport      │
//! │ MediaEngine             │  (application-supplied collaborators)
//! └─────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use softphone_core::{ClientBuilder, ClientConfig, Identity, MediaOptions};
//! # use softphone_core::{SignalingTransport, MediaEngine, TransportEvent};
//! # async fn example(
//! #     transport: Arc<dyn SignalingTransport>,
//! #     events: tokio::sync::mpsc::Receiver<TransportEvent>,
//! #     media: Arc<dyn MediaEngine>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new(
//!     Identity::new("alice", "example.com"),
//!     "sips:edge.example.com:5061",
//! );
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
//! # let _ = call_id;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::call::{CallId, CallInfo, CallState, TerminationReason};
use crate::client::config::ClientConfig;
use crate::client::events::EventDispatcher;
use crate::connection::{ConnectionState, ConnectionSupervisor};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, ClientEventHandler};
use crate::media::MediaEngine;
use crate::registration::{RegistrationBinding, RegistrationManager, RegistrationState};
use crate::session::SessionStore;
use crate::transport::{SignalingTransport, TransportEvent};

/// Aggregate view of the client's current activity
#[derive(Debug, Clone)]
pub struct ClientStats {
    /// Whether the event loop is running
    pub is_running: bool,
    /// Current connection state
    pub connection: ConnectionState,
    /// Current registration state
    pub registration: RegistrationState,
    /// Sessions created since the client was built
    pub total_calls: usize,
    /// Registration attempts since the client was built
    pub total_registrations: usize,
    /// Non-terminal sessions right now
    pub active_calls: usize,
    /// Sessions currently in `Established`
    pub established_calls: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total_calls: usize,
    total_registrations: usize,
}

/// The signaling session core
///
/// Construct via [`ClientBuilder`](super::builder::ClientBuilder), then
/// [`start`](Self::start) the event loop, [`connect`](Self::connect) and
/// [`register`](Self::register). All methods are safe to call concurrently
/// from multiple tasks.
pub struct SessionClient {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn SignalingTransport>,
    pub(crate) media: Arc<dyn MediaEngine>,
    pub(crate) connection: Arc<ConnectionSupervisor>,
    pub(crate) registrar: Arc<RegistrationManager>,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    is_running: RwLock<bool>,
    counters: Mutex<Counters>,
    transport_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    event_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
    dispatch_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Back-reference for handing `Arc<Self>` to spawned tasks
    weak_self: Weak<SessionClient>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Create a client with its own session store.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn SignalingTransport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        media: Arc<dyn MediaEngine>,
    ) -> ClientResult<Arc<Self>> {
        Self::with_store(config, transport, transport_events, media, Arc::new(SessionStore::new()))
    }

    /// Create a client around an explicitly constructed session store.
    pub fn with_store(
        config: ClientConfig,
        transport: Arc<dyn SignalingTransport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        media: Arc<dyn MediaEngine>,
        sessions: Arc<SessionStore>,
    ) -> ClientResult<Arc<Self>> {
        config.validate()?;

        let dispatcher = Arc::new(EventDispatcher::new(config.event_buffer));
        let connection = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&transport),
            Arc::clone(&dispatcher),
            config.server.clone(),
            config.identity.credentials.clone(),
            config.reconnect.clone(),
        ));
        let binding = RegistrationBinding {
            server_uri: config.server.clone(),
            from_uri: config.identity.uri(),
            user_agent: config.user_agent.clone(),
            expires: config.register_expires,
        };
        let registrar = RegistrationManager::new(
            Arc::clone(&transport),
            Arc::clone(&connection),
            Arc::clone(&dispatcher),
            binding,
            config.register_refresh_fraction,
        );

        Ok(Arc::new_cyclic(|weak| Self {
            config,
            transport,
            media,
            connection,
            registrar,
            sessions,
            dispatcher,
            is_running: RwLock::new(false),
            counters: Mutex::new(Counters::default()),
            transport_rx: Mutex::new(Some(transport_events)),
            event_loop: std::sync::Mutex::new(None),
            dispatch_task: std::sync::Mutex::new(None),
            weak_self: weak.clone(),
        }))
    }

    /// Start the transport event loop. Must be called before `connect`.
    pub async fn start(&self) -> ClientResult<()> {
        if *self.is_running.read().await {
            return Ok(());
        }
        let events = self.transport_rx.lock().await.take().ok_or_else(|| {
            ClientError::InternalError { message: "client was already started once".into() }
        })?;
        if let Some(dispatch) = self.dispatcher.spawn_dispatch() {
            *self.dispatch_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(dispatch);
        }
        let handle = self.spawn_event_loop(events);
        *self.event_loop.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        *self.is_running.write().await = true;
        info!(identity = %self.config.identity.uri(), "session client started");
        Ok(())
    }

    /// Stop everything: hang up sessions, unregister, disconnect.
    pub async fn stop(&self) -> ClientResult<()> {
        if !*self.is_running.read().await {
            return Ok(());
        }
        *self.is_running.write().await = false;

        // Signal teardown for every active session concurrently, then settle
        // whatever the remote has not acknowledged.
        let ids = self.sessions.active_ids();
        futures::future::join_all(ids.into_iter().map(|call_id| async move {
            let _ = self.terminate(&call_id).await;
        }))
        .await;
        for call_id in self.sessions.active_ids() {
            let _ = self.settle_terminated(&call_id, TerminationReason::LocalHangup).await;
        }

        self.registrar.clear_auto_reregister();
        if self.registrar.is_registered().await {
            let _ = self.registrar.unregister().await;
        }
        let _ = self.connection.disconnect().await;

        if let Some(task) = self.event_loop.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        info!("session client stopped");
        Ok(())
    }

    /// Open the connection to the configured signaling server.
    pub async fn connect(&self) -> ClientResult<()> {
        self.ensure_running().await?;
        self.connection.connect().await
    }

    /// Close the connection. Active sessions are settled locally and the
    /// registration is dropped; no reconnection follows.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.registrar.clear_auto_reregister();
        for call_id in self.sessions.active_ids() {
            let _ = self.settle_terminated(&call_id, TerminationReason::ConnectionLost).await;
        }
        if self.registrar.is_registered().await {
            let _ = self.registrar.unregister().await;
        }
        self.connection.disconnect().await
    }

    /// Bind the local identity at the registrar.
    pub async fn register(&self) -> ClientResult<()> {
        self.ensure_running().await?;
        self.counters.lock().await.total_registrations += 1;
        self.registrar.register().await
    }

    /// Remove the registrar binding.
    pub async fn unregister(&self) -> ClientResult<()> {
        self.registrar.unregister().await
    }

    /// Subscribe to the event stream from this point on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.dispatcher.subscribe()
    }

    /// Install the callback event handler.
    pub fn set_event_handler(&self, handler: Arc<dyn ClientEventHandler>) {
        self.dispatcher.set_handler(handler);
    }

    /// Current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    /// Current registration state
    pub async fn registration_state(&self) -> RegistrationState {
        self.registrar.state().await
    }

    /// Snapshot of one session, in any state.
    pub fn get_call(&self, call_id: &CallId) -> ClientResult<CallInfo> {
        self.sessions.snapshot(call_id)
    }

    /// Snapshot of all non-terminal sessions. Safe to call concurrently
    /// with mutations; the result does not change afterwards.
    pub fn active_calls(&self) -> Vec<CallInfo> {
        self.sessions.active_calls()
    }

    /// Snapshot of every session, terminated ones included.
    pub fn call_history(&self) -> Vec<CallInfo> {
        self.sessions.call_history()
    }

    /// Aggregate activity counters and subsystem states
    pub async fn stats(&self) -> ClientStats {
        let counters = self.counters.lock().await;
        let active = self.sessions.active_calls();
        ClientStats {
            is_running: *self.is_running.read().await,
            connection: self.connection.state().await,
            registration: self.registrar.state().await,
            total_calls: counters.total_calls,
            total_registrations: counters.total_registrations,
            active_calls: active.len(),
            established_calls: active
                .iter()
                .filter(|c| c.state == CallState::Established)
                .count(),
        }
    }

    /// `Arc<Self>` for handing to spawned tasks.
    ///
    /// The client is always behind an `Arc` (constructors return one), so
    /// the upgrade cannot fail while a method is executing.
    pub(crate) fn strong(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("SessionClient outlives its running methods")
    }

    pub(crate) async fn ensure_running(&self) -> ClientResult<()> {
        if *self.is_running.read().await {
            Ok(())
        } else {
            Err(ClientError::InternalError {
                message: "Client is not started. Call start() first.".into(),
            })
        }
    }

    pub(crate) async fn note_call_created(&self) {
        self.counters.lock().await.total_calls += 1;
    }
}
