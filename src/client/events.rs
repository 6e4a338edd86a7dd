//! Event fan-out and transport event handling
//!
//! [`EventDispatcher`] is the single point through which the core publishes
//! state changes. Every event goes to two places:
//!
//! - a broadcast channel for stream consumers
//!   ([`SessionClient::subscribe_events`](super::SessionClient::subscribe_events)),
//!   and
//! - an ordered queue drained by one dispatch task that invokes the
//!   registered [`ClientEventHandler`] callbacks sequentially, so handler
//!   notifications for a session arrive in transition order.
//!
//! Emission is synchronous and happens inside the session store's critical
//! sections, which is what ties delivery order to the order transitions were
//! actually observed.
//!
//! The second half of this module is the transport event loop: the single
//! serialized consumer of [`TransportEvent`]s that turns remote signals into
//! session transitions.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::call::{CallId, CallState, TerminationReason};
use crate::connection::DisconnectAction;
use crate::events::{
    CallAction, CallStatusInfo, ClientEvent, ClientEventHandler, EventPriority, IncomingCallInfo,
};
use crate::session::Session;
use crate::transport::{
    DisconnectReason, IncomingOffer, SessionSignal, SignalMessage, TransportEvent,
};

use super::manager::SessionClient;

/// Fan-out of client events to subscribers and the registered handler
pub struct EventDispatcher {
    broadcast_tx: broadcast::Sender<ClientEvent>,
    queue_tx: mpsc::UnboundedSender<ClientEvent>,
    queue_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    handler: Arc<RwLock<Option<Arc<dyn ClientEventHandler>>>>,
}

impl EventDispatcher {
    /// Create the dispatcher.
    ///
    /// `capacity` bounds the broadcast channel; slow stream subscribers that
    /// fall more than `capacity` events behind observe a lag error, not a
    /// stalled core. The ordered dispatch task is spawned by
    /// [`spawn_dispatch`](Self::spawn_dispatch) when the client starts;
    /// events emitted before that queue up and are delivered in order.
    pub(crate) fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            broadcast_tx,
            queue_tx,
            queue_rx: std::sync::Mutex::new(Some(queue_rx)),
            handler: Arc::new(RwLock::new(None)),
        }
    }

    /// Spawn the single task that drives handler callbacks in order.
    /// Returns `None` when it was already spawned.
    pub(crate) fn spawn_dispatch(&self) -> Option<JoinHandle<()>> {
        let queue_rx = self.queue_rx.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        Some(tokio::spawn(Self::dispatch_loop(queue_rx, Arc::clone(&self.handler))))
    }

    /// Publish one event to both delivery paths. Never blocks.
    pub(crate) fn emit(&self, event: ClientEvent) {
        // A send error just means nobody is listening on that path.
        let _ = self.broadcast_tx.send(event.clone());
        let _ = self.queue_tx.send(event);
    }

    /// New broadcast subscription receiving events from this point on
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Install the callback handler (replaces any previous one)
    pub(crate) fn set_handler(&self, handler: Arc<dyn ClientEventHandler>) {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// The currently registered handler, if any
    pub(crate) fn handler(&self) -> Option<Arc<dyn ClientEventHandler>> {
        self.handler.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn dispatch_loop(
        mut queue_rx: mpsc::UnboundedReceiver<ClientEvent>,
        handler: Arc<RwLock<Option<Arc<dyn ClientEventHandler>>>>,
    ) {
        while let Some(event) = queue_rx.recv().await {
            let current = handler.read().unwrap_or_else(|e| e.into_inner()).clone();
            let Some(current) = current else { continue };
            match event {
                ClientEvent::CallStateChanged { info, .. } => {
                    current.on_call_state_changed(info).await;
                }
                ClientEvent::RegistrationStatusChanged { info, .. } => {
                    current.on_registration_state_changed(info).await;
                }
                ClientEvent::ConnectionStatusChanged { info, .. } => {
                    current.on_connection_state_changed(info).await;
                }
                ClientEvent::ClientError { error, call_id, .. } => {
                    current.on_client_error(error, call_id).await;
                }
                // The decision callback is invoked by the event loop when the
                // offer arrives; only the broadcast path carries this event.
                ClientEvent::IncomingCall { .. } => {}
            }
        }
    }
}

/// Transport event handling
impl SessionClient {
    /// Spawn the single serialized consumer of transport events.
    pub(crate) fn spawn_event_loop(
        &self,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let client = self.strong();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                client.handle_transport_event(event).await;
            }
            debug!("transport event channel closed");
        })
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected().await,
            TransportEvent::Disconnected { reason } => {
                self.on_transport_disconnected(reason).await
            }
            TransportEvent::IncomingOffer(offer) => self.on_incoming_offer(offer).await,
            TransportEvent::SessionSignal { call_id, signal } => {
                self.on_session_signal(call_id, signal).await
            }
        }
    }

    async fn on_transport_connected(&self) {
        if self.connection.note_connected().await {
            // The transport restored the link on its own; rebind if a
            // registration was active before.
            self.registrar.restore().await;
        }
    }

    async fn on_transport_disconnected(&self, reason: DisconnectReason) {
        match self.connection.note_disconnected(&reason).await {
            DisconnectAction::Ignore => {
                debug!(%reason, "ignoring disconnect event while not connected");
            }
            DisconnectAction::TearDown { reconnect } => {
                self.registrar.handle_connection_lost().await;
                for call_id in self.sessions.active_ids() {
                    if let Err(e) =
                        self.settle_terminated(&call_id, TerminationReason::ConnectionLost).await
                    {
                        warn!(%call_id, error = %e, "failed to settle session after disconnect");
                    }
                }
                if reconnect {
                    self.spawn_reconnect();
                }
            }
        }
    }

    pub(crate) fn spawn_reconnect(&self) {
        let client = self.strong();
        let handle = tokio::spawn(async move {
            if client.connection.reconnect().await.is_ok() {
                client.registrar.restore().await;
            }
        });
        self.connection.track_reconnect_task(handle);
    }

    /// An inbound offer: create the session, notify, apply the handler's
    /// decision. Media is not touched here — acquisition is deferred to
    /// `answer` so that declining never opens local devices.
    async fn on_incoming_offer(&self, offer: IncomingOffer) {
        let call_id = offer.call_id;

        if !self.registrar.is_registered().await {
            debug!(%call_id, "declining offer received while unregistered");
            let _ = self.transport.send(SignalMessage::Reject { call_id }).await;
            return;
        }
        if self.sessions.active_count() >= self.config.max_concurrent_calls {
            info!(%call_id, "declining offer: concurrent call limit reached");
            let _ = self.transport.send(SignalMessage::Reject { call_id }).await;
            return;
        }

        let mut session = Session::incoming(
            call_id,
            self.config.identity.uri(),
            offer.caller_uri.clone(),
            offer.caller_display_name.clone(),
            offer.media,
        );
        if let Err(e) = session.transition(CallState::Establishing) {
            warn!(%call_id, error = %e, "could not stage incoming session");
            return;
        }
        if let Err(e) = self.sessions.insert(session) {
            warn!(%call_id, error = %e, "dropping duplicate incoming offer");
            return;
        }
        self.note_call_created().await;

        let info = IncomingCallInfo {
            call_id,
            caller_uri: offer.caller_uri,
            callee_uri: self.config.identity.uri(),
            caller_display_name: offer.caller_display_name,
            offers_video: offer.media.video,
            created_at: Utc::now(),
        };
        info!(%call_id, caller = %info.caller_uri, "incoming call");
        self.dispatcher.emit(ClientEvent::IncomingCall {
            info: info.clone(),
            priority: EventPriority::High,
        });
        self.spawn_establish_watchdog(call_id);

        if let Some(handler) = self.dispatcher.handler() {
            match handler.on_incoming_call(info).await {
                CallAction::Accept => {
                    let client = self.strong();
                    let media = self.config.default_media;
                    tokio::spawn(async move {
                        if let Err(e) = client.answer(&call_id, media).await {
                            warn!(%call_id, error = %e, "auto-answer failed");
                        }
                    });
                }
                CallAction::Reject => {
                    let client = self.strong();
                    tokio::spawn(async move {
                        if let Err(e) = client.reject(&call_id).await {
                            warn!(%call_id, error = %e, "auto-reject failed");
                        }
                    });
                }
                CallAction::Ignore => {}
            }
        }
    }

    async fn on_session_signal(&self, call_id: CallId, signal: SessionSignal) {
        match signal {
            SessionSignal::Accepted => self.on_remote_accepted(call_id).await,
            SessionSignal::Rejected { reason } => {
                debug!(%call_id, reason = ?reason, "offer rejected by remote");
                if let Err(e) =
                    self.settle_terminated(&call_id, TerminationReason::RemoteRejected).await
                {
                    debug!(%call_id, error = %e, "rejection for unknown session");
                }
            }
            SessionSignal::Terminated { reason } => {
                debug!(%call_id, reason = ?reason, "session terminated by remote");
                if let Err(e) =
                    self.settle_terminated(&call_id, TerminationReason::RemoteHangup).await
                {
                    debug!(%call_id, error = %e, "termination for unknown session");
                }
            }
            SessionSignal::TerminateAck => {
                let terminating = self
                    .sessions
                    .with_session(&call_id, |s| Ok(s.info.state == CallState::Terminating))
                    .unwrap_or(false);
                if terminating {
                    let _ = self.settle_terminated(&call_id, TerminationReason::LocalHangup).await;
                } else {
                    debug!(%call_id, "ignoring stray terminate ack");
                }
            }
        }
    }

    /// The remote accepted our offer: attach media, then commit
    /// `Established`. Attachment happens before the transition so a session
    /// can never be `Established` without working media.
    async fn on_remote_accepted(&self, call_id: CallId) {
        let handle = match self.sessions.with_session(&call_id, |s| {
            if s.info.state == CallState::Establishing
                && s.info.direction == crate::call::CallDirection::Outgoing
            {
                Ok(s.media.clone())
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!(%call_id, "ignoring stale accept");
                return;
            }
            Err(e) => {
                debug!(%call_id, error = %e, "accept for unknown session");
                return;
            }
        };

        if let Err(e) = self.media.attach(&handle, &call_id).await {
            warn!(%call_id, error = %e, "media attach failed on accept");
            let _ = self.settle_terminated(&call_id, TerminationReason::MediaFailure).await;
            return;
        }

        let committed = self.sessions.with_session(&call_id, |s| {
            if s.info.state != CallState::Establishing {
                return Ok(false);
            }
            let previous = s.transition(CallState::Established)?;
            s.info.connected_at = Some(Utc::now());
            self.dispatcher.emit(ClientEvent::CallStateChanged {
                info: CallStatusInfo {
                    call_id,
                    new_state: CallState::Established,
                    previous_state: Some(previous),
                    reason: Some("answered".into()),
                    timestamp: Utc::now(),
                },
                priority: EventPriority::Normal,
            });
            Ok(true)
        });

        match committed {
            Ok(true) => info!(%call_id, "call established"),
            Ok(false) => debug!(%call_id, "session ended before accept could commit"),
            Err(e) => warn!(%call_id, error = %e, "failed to commit accept"),
        }
    }
}
