//! Connection supervision
//!
//! [`ConnectionSupervisor`] owns the persistent transport connection and is
//! the only writer of [`ConnectionState`]. It distinguishes caller-initiated
//! disconnects from unexpected ones, and drives reconnection with bounded
//! exponential backoff; once the attempt budget is exhausted it parks in
//! `Failed` until the caller explicitly reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::config::Credentials;
use crate::client::events::EventDispatcher;
use crate::client::recovery::{retry_with_backoff, RetryConfig};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, ConnectionStatusInfo, EventPriority};
use crate::transport::{DisconnectReason, SignalingTransport};

/// State of the transport connection
///
/// Owned exclusively by the supervisor; everything else only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection open
    Disconnected,
    /// A connect or reconnect attempt is in progress
    Connecting,
    /// The connection is up
    Connected,
    /// Reconnection attempts are exhausted; explicit recovery required
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// What the client should do about a transport disconnect event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisconnectAction {
    /// Stale or self-inflicted while not connected; nothing to do
    Ignore,
    /// The live connection dropped; fail sessions and registration
    TearDown {
        /// Whether the supervisor should attempt to reconnect
        reconnect: bool,
    },
}

/// Supervises the persistent connection to the signaling server
pub struct ConnectionSupervisor {
    transport: Arc<dyn SignalingTransport>,
    dispatcher: Arc<EventDispatcher>,
    endpoint: String,
    credentials: Option<Credentials>,
    policy: RetryConfig,
    state: RwLock<ConnectionState>,
    /// Set around caller-initiated disconnects so the resulting transport
    /// event does not trigger reconnection
    local_disconnect: AtomicBool,
    reconnect_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub(crate) fn new(
        transport: Arc<dyn SignalingTransport>,
        dispatcher: Arc<EventDispatcher>,
        endpoint: String,
        credentials: Option<Credentials>,
        policy: RetryConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            endpoint,
            credentials,
            policy,
            state: RwLock::new(ConnectionState::Disconnected),
            local_disconnect: AtomicBool::new(false),
            reconnect_task: std::sync::Mutex::new(None),
        }
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Whether the connection is currently up
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Fail fast with `NotConnected` unless the connection is up.
    ///
    /// Origination requests are never queued while disconnected.
    pub async fn ensure_connected(&self) -> ClientResult<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    async fn set_state(&self, next: ConnectionState, reason: Option<String>) -> bool {
        let previous = {
            let mut state = self.state.write().await;
            if *state == next {
                return false;
            }
            let previous = *state;
            *state = next;
            previous
        };
        debug!(%previous, state = %next, "connection state change");
        let priority = match next {
            ConnectionState::Failed => EventPriority::Critical,
            ConnectionState::Disconnected => EventPriority::High,
            _ => EventPriority::Normal,
        };
        self.dispatcher.emit(ClientEvent::ConnectionStatusChanged {
            info: ConnectionStatusInfo {
                state: next,
                previous_state: Some(previous),
                reason,
                timestamp: chrono::Utc::now(),
            },
            priority,
        });
        true
    }

    /// Open the connection to the configured endpoint.
    ///
    /// A single attempt; backoff applies only to automatic reconnection.
    pub async fn connect(&self) -> ClientResult<()> {
        if self.is_connected().await {
            return Ok(());
        }
        self.abort_reconnect();
        self.local_disconnect.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting, None).await;

        match self.transport.connect(&self.endpoint, self.credentials.as_ref()).await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected, None).await;
                info!(endpoint = %self.endpoint, "connected to signaling server");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected, Some(e.to_string())).await;
                Err(ClientError::NetworkError { reason: e.to_string() })
            }
        }
    }

    /// Close the connection at the caller's request. No reconnection follows.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.local_disconnect.store(true, Ordering::SeqCst);
        self.abort_reconnect();
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "transport disconnect reported an error");
        }
        self.set_state(ConnectionState::Disconnected, Some("requested".into())).await;
        Ok(())
    }

    /// Record a `Connected` transport event. Returns whether it was news.
    pub(crate) async fn note_connected(&self) -> bool {
        self.set_state(ConnectionState::Connected, None).await
    }

    /// Record a `Disconnected` transport event and decide what follows.
    ///
    /// Only a drop of the live connection tears sessions down; events that
    /// arrive while already disconnected, failed, or mid-attempt are stale.
    pub(crate) async fn note_disconnected(&self, reason: &DisconnectReason) -> DisconnectAction {
        if self.state().await != ConnectionState::Connected {
            return DisconnectAction::Ignore;
        }
        self.set_state(ConnectionState::Disconnected, Some(reason.to_string())).await;

        let local = self.local_disconnect.load(Ordering::SeqCst)
            || matches!(reason, DisconnectReason::Requested);
        if local {
            DisconnectAction::TearDown { reconnect: false }
        } else {
            warn!(%reason, "connection lost unexpectedly");
            DisconnectAction::TearDown { reconnect: self.policy.max_attempts > 0 }
        }
    }

    /// Reconnect with the configured backoff policy.
    ///
    /// On exhaustion the supervisor parks in `Failed` and emits a terminal
    /// error event; only an explicit [`connect`](Self::connect) leaves that
    /// state.
    pub(crate) async fn reconnect(&self) -> ClientResult<()> {
        self.set_state(ConnectionState::Connecting, Some("reconnecting".into())).await;

        let result = retry_with_backoff("reconnect", self.policy.clone(), || async {
            self.transport
                .connect(&self.endpoint, self.credentials.as_ref())
                .await
                .map_err(|e| ClientError::NetworkError { reason: e.to_string() })
        })
        .await;

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected, Some("reconnected".into())).await;
                info!(endpoint = %self.endpoint, "reconnected to signaling server");
                Ok(())
            }
            Err(e) => {
                let error = ClientError::ConnectionFailed {
                    attempts: self.policy.max_attempts,
                    reason: e.to_string(),
                };
                self.set_state(ConnectionState::Failed, Some(error.to_string())).await;
                self.dispatcher.emit(ClientEvent::ClientError {
                    error: error.clone(),
                    call_id: None,
                    priority: EventPriority::Critical,
                });
                Err(error)
            }
        }
    }

    /// Remember the in-flight reconnect task so it can be cancelled.
    pub(crate) fn track_reconnect_task(&self, handle: JoinHandle<()>) {
        let mut slot = self.reconnect_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Cancel any in-flight reconnect task.
    pub(crate) fn abort_reconnect(&self) {
        let mut slot = self.reconnect_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}
