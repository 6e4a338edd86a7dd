//! Registration management
//!
//! [`RegistrationManager`] keeps the local identity bound to the signaling
//! server for as long as the connection is up: it performs the initial
//! registrar exchange, renews the binding before the granted lease expires,
//! drops straight to `Unregistered` when the connection is lost (no renewals
//! against a dead connection), and re-registers automatically after a
//! reconnect.
//!
//! A renewal failure is surfaced as an event and leaves the manager in
//! `RegistrationFailed`, but never tears down active sessions — an
//! in-progress call survives a registration hiccup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::events::EventDispatcher;
use crate::client::recovery::{retry_with_backoff, RetryConfig};
use crate::connection::ConnectionSupervisor;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventPriority, RegistrationStatusInfo};
use crate::transport::{SignalingTransport, TransportError};

/// State of the registrar binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    /// No binding exists
    Unregistered,
    /// The registrar exchange is in progress
    Registering,
    /// The binding is active and being renewed
    Registered,
    /// The binding or a renewal was refused; explicit re-register required
    RegistrationFailed,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "Unregistered"),
            RegistrationState::Registering => write!(f, "Registering"),
            RegistrationState::Registered => write!(f, "Registered"),
            RegistrationState::RegistrationFailed => write!(f, "RegistrationFailed"),
        }
    }
}

/// What the transport binds at the registrar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationBinding {
    /// Registrar URI
    pub server_uri: String,
    /// Address of record being bound
    pub from_uri: String,
    /// User agent presented alongside the binding
    pub user_agent: String,
    /// Requested lease in seconds; the registrar may grant less
    pub expires: u32,
}

/// Maintains the registrar binding over the supervised connection
pub struct RegistrationManager {
    transport: Arc<dyn SignalingTransport>,
    connection: Arc<ConnectionSupervisor>,
    dispatcher: Arc<EventDispatcher>,
    binding: RegistrationBinding,
    refresh_fraction: f64,
    state: RwLock<RegistrationState>,
    /// Lease granted by the registrar on the last successful exchange
    lease: RwLock<Option<u32>>,
    /// Whether a binding should be restored after reconnection
    auto_reregister: AtomicBool,
    refresh_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Back-reference for handing `Arc<Self>` to the refresh task
    weak_self: Weak<RegistrationManager>,
}

impl RegistrationManager {
    pub(crate) fn new(
        transport: Arc<dyn SignalingTransport>,
        connection: Arc<ConnectionSupervisor>,
        dispatcher: Arc<EventDispatcher>,
        binding: RegistrationBinding,
        refresh_fraction: f64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            transport,
            connection,
            dispatcher,
            binding,
            refresh_fraction,
            state: RwLock::new(RegistrationState::Unregistered),
            lease: RwLock::new(None),
            auto_reregister: AtomicBool::new(false),
            refresh_task: std::sync::Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    fn strong(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("RegistrationManager outlives its running methods")
    }

    /// Current registration state
    pub async fn state(&self) -> RegistrationState {
        *self.state.read().await
    }

    /// Whether the binding is currently active
    pub async fn is_registered(&self) -> bool {
        self.state().await == RegistrationState::Registered
    }

    /// Lease granted by the registrar, while registered
    pub async fn lease(&self) -> Option<u32> {
        *self.lease.read().await
    }

    async fn set_state(&self, next: RegistrationState, expires: Option<u32>, reason: Option<String>) {
        {
            let mut state = self.state.write().await;
            if *state == next {
                return;
            }
            debug!(previous = %*state, state = %next, "registration state change");
            *state = next;
        }
        let priority = match next {
            RegistrationState::RegistrationFailed => EventPriority::High,
            _ => EventPriority::Normal,
        };
        self.dispatcher.emit(ClientEvent::RegistrationStatusChanged {
            info: RegistrationStatusInfo {
                state: next,
                server_uri: self.binding.server_uri.clone(),
                user_uri: self.binding.from_uri.clone(),
                expires,
                reason,
                timestamp: chrono::Utc::now(),
            },
            priority,
        });
    }

    /// Bind the local identity at the registrar.
    ///
    /// Requires the connection to be up; transient failures are retried with
    /// the slow backoff profile before giving up. On success a refresh task
    /// renews the binding at the configured fraction of the granted lease.
    pub async fn register(&self) -> ClientResult<()> {
        self.connection.ensure_connected().await?;
        if self.is_registered().await {
            return Ok(());
        }
        self.set_state(RegistrationState::Registering, None, None).await;

        let result = retry_with_backoff("register", RetryConfig::slow(), || async {
            self.transport
                .register(&self.binding)
                .await
                .map_err(map_registration_error)
        })
        .await;

        match result {
            Ok(granted) => {
                *self.lease.write().await = Some(granted);
                self.auto_reregister.store(true, Ordering::SeqCst);
                self.set_state(RegistrationState::Registered, Some(granted), None).await;
                info!(aor = %self.binding.from_uri, expires = granted, "registered");
                self.spawn_refresh_task();
                Ok(())
            }
            Err(e) => {
                self.set_state(RegistrationState::RegistrationFailed, None, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Remove the registrar binding.
    ///
    /// The local state always ends `Unregistered`; a wire failure is
    /// returned after local cleanup.
    pub async fn unregister(&self) -> ClientResult<()> {
        self.auto_reregister.store(false, Ordering::SeqCst);
        self.abort_refresh();
        *self.lease.write().await = None;

        let was_bound = matches!(
            self.state().await,
            RegistrationState::Registered | RegistrationState::Registering
        );
        let wire_result = if was_bound && self.connection.is_connected().await {
            self.transport.unregister().await
        } else {
            Ok(())
        };
        self.set_state(RegistrationState::Unregistered, None, None).await;

        wire_result.map_err(|e| {
            warn!(error = %e, "unregister exchange failed");
            map_registration_error(e)
        })
    }

    /// React to a lost connection: no renewals against a dead connection.
    ///
    /// The auto-reregister intent is kept, so [`restore`](Self::restore)
    /// rebinds after a successful reconnect.
    pub(crate) async fn handle_connection_lost(&self) {
        self.abort_refresh();
        *self.lease.write().await = None;
        self.set_state(
            RegistrationState::Unregistered,
            None,
            Some("connection lost".into()),
        )
        .await;
    }

    /// Re-register after a reconnect, when a binding was previously active.
    pub(crate) async fn restore(&self) {
        if !self.auto_reregister.load(Ordering::SeqCst) {
            return;
        }
        if !self.connection.is_connected().await || self.is_registered().await {
            return;
        }
        if let Err(e) = self.register().await {
            warn!(error = %e, "automatic re-registration failed");
        }
    }

    /// Drop the auto-reregister intent (explicit client disconnect).
    pub(crate) fn clear_auto_reregister(&self) {
        self.auto_reregister.store(false, Ordering::SeqCst);
    }

    fn spawn_refresh_task(&self) {
        self.abort_refresh();
        let manager = self.strong();
        let handle = tokio::spawn(async move {
            loop {
                let lease = (*manager.lease.read().await).unwrap_or(manager.binding.expires);
                let wait = Duration::from_secs_f64(
                    (lease as f64 * manager.refresh_fraction).max(1.0),
                );
                tokio::time::sleep(wait).await;

                if !manager.connection.is_connected().await {
                    break;
                }
                match manager.transport.register(&manager.binding).await {
                    Ok(granted) => {
                        *manager.lease.write().await = Some(granted);
                        debug!(expires = granted, "registration renewed");
                    }
                    Err(e) => {
                        warn!(error = %e, "registration renewal failed");
                        manager
                            .set_state(
                                RegistrationState::RegistrationFailed,
                                None,
                                Some(e.to_string()),
                            )
                            .await;
                        manager.dispatcher.emit(ClientEvent::ClientError {
                            error: ClientError::RegistrationFailed { reason: e.to_string() },
                            call_id: None,
                            priority: EventPriority::High,
                        });
                        break;
                    }
                }
            }
        });
        let mut slot = self.refresh_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn abort_refresh(&self) {
        let mut slot = self.refresh_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

fn map_registration_error(e: TransportError) -> ClientError {
    match e {
        TransportError::NotConnected => ClientError::NotConnected,
        TransportError::Timeout => ClientError::Timeout { operation: "register".into() },
        TransportError::ConnectFailed { reason } | TransportError::SendFailed { reason } => {
            ClientError::NetworkError { reason }
        }
        TransportError::Rejected { reason } => ClientError::RegistrationFailed { reason },
    }
}
