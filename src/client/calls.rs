//! Call lifecycle operations
//!
//! Origination, answering, rejection and termination. Every state check and
//! transition runs under the session store's entry lock, so a local
//! operation racing a remote event for the same session resolves to exactly
//! one winner; the loser observes the new state and fails (or no-ops) per
//! its contract.
//!
//! Termination always completes locally: the outbound signal is best-effort,
//! a watchdog settles the session if the remote never acknowledges, and the
//! media handle is taken out of the session exactly once no matter which
//! path gets there first.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::call::{CallDirection, CallId, CallState, TerminationReason};
use crate::error::{ClientError, ClientResult};
use crate::events::{CallStatusInfo, ClientEvent, EventPriority};
use crate::media::MediaOptions;
use crate::session::Session;
use crate::transport::SignalMessage;

use super::manager::SessionClient;

/// Which teardown signal `terminate` owes the remote
enum TeardownSignal {
    Cancel,
    Reject,
    Bye,
}

impl SessionClient {
    /// Place an outgoing call.
    ///
    /// Requires a running client, an open connection and an active
    /// registration. Media is acquired *before* the offer is sent; if
    /// acquisition fails the session is discarded without ever being stored.
    /// Returns as soon as the offer is out — acceptance or rejection arrives
    /// asynchronously and is observable via events and
    /// [`get_call`](Self::get_call).
    pub async fn originate(
        &self,
        target: &str,
        media: MediaOptions,
    ) -> ClientResult<CallId> {
        self.ensure_running().await?;
        self.connection.ensure_connected().await?;
        if !self.registrar.is_registered().await {
            return Err(ClientError::NotRegistered);
        }
        if target.is_empty() {
            return Err(ClientError::InvalidConfiguration {
                field: "target".into(),
                reason: "target URI must be non-empty".into(),
            });
        }
        let active = self.sessions.active_count();
        if active >= self.config.max_concurrent_calls {
            return Err(ClientError::TooManyCalls {
                active,
                limit: self.config.max_concurrent_calls,
            });
        }

        let handle = self.media.acquire(&media).await.map_err(|e| {
            ClientError::MediaAcquisitionFailed { reason: e.to_string() }
        })?;

        let call_id = CallId::new_v4();
        let mut session =
            Session::outgoing(call_id, self.config.identity.uri(), target.to_string(), media);
        session.transition(CallState::Establishing)?;
        session.media = Some(handle);
        self.sessions.insert(session)?;
        self.note_call_created().await;

        self.dispatcher.emit(ClientEvent::CallStateChanged {
            info: CallStatusInfo {
                call_id,
                new_state: CallState::Establishing,
                previous_state: Some(CallState::Initial),
                reason: Some("offer sent".into()),
                timestamp: Utc::now(),
            },
            priority: EventPriority::Normal,
        });

        if let Err(e) = self
            .transport
            .send(SignalMessage::Offer { call_id, target: target.to_string(), media })
            .await
        {
            warn!(%call_id, error = %e, "failed to send offer");
            let _ = self.settle_terminated(&call_id, TerminationReason::ConnectionLost).await;
            return Err(ClientError::NetworkError { reason: e.to_string() });
        }

        info!(%call_id, %target, "outgoing call started");
        self.spawn_establish_watchdog(call_id);
        Ok(call_id)
    }

    /// Answer an incoming call.
    ///
    /// Valid only while the session is `Establishing` and was received from
    /// the remote. Acquires and attaches media first; the session reaches
    /// `Established` only with working media. A second answer racing this
    /// one fails with `InvalidSessionState` instead of opening devices
    /// twice.
    pub async fn answer(&self, call_id: &CallId, media: MediaOptions) -> ClientResult<()> {
        self.sessions.with_session(call_id, |s| match s.info.state {
            CallState::Terminated => Err(ClientError::SessionEnded { call_id: *call_id }),
            CallState::Establishing
                if s.info.direction == CallDirection::Incoming && !s.answering =>
            {
                s.answering = true;
                Ok(())
            }
            state => Err(ClientError::InvalidSessionState { call_id: *call_id, state }),
        })?;

        let handle = match self.media.acquire(&media).await {
            Ok(handle) => handle,
            Err(e) => {
                // Leave the session answerable (or rejectable); only the
                // acquisition attempt failed.
                let _ = self.sessions.with_session(call_id, |s| {
                    s.answering = false;
                    Ok(())
                });
                return Err(ClientError::MediaAcquisitionFailed { reason: e.to_string() });
            }
        };
        if let Err(e) = self.media.attach(&handle, call_id).await {
            self.media.release(handle).await;
            let _ = self.sessions.with_session(call_id, |s| {
                s.answering = false;
                Ok(())
            });
            return Err(ClientError::MediaAcquisitionFailed { reason: e.to_string() });
        }

        if let Err(e) = self.transport.send(SignalMessage::Answer { call_id: *call_id }).await {
            self.media.release(handle).await;
            let _ = self.sessions.with_session(call_id, |s| {
                s.answering = false;
                Ok(())
            });
            return Err(ClientError::NetworkError { reason: e.to_string() });
        }

        let committed = self.sessions.with_session(call_id, |s| {
            s.answering = false;
            if s.info.state != CallState::Establishing {
                // Terminated while we were acquiring media.
                return Ok(false);
            }
            let previous = s.transition(CallState::Established)?;
            s.media = Some(handle.clone());
            s.info.media = media;
            s.info.connected_at = Some(Utc::now());
            self.dispatcher.emit(ClientEvent::CallStateChanged {
                info: CallStatusInfo {
                    call_id: *call_id,
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
            Ok(true) => {
                info!(%call_id, "incoming call answered");
                Ok(())
            }
            Ok(false) | Err(ClientError::SessionNotFound { .. }) => {
                self.media.release(handle).await;
                Err(ClientError::SessionEnded { call_id: *call_id })
            }
            Err(e) => {
                self.media.release(handle).await;
                Err(e)
            }
        }
    }

    /// Decline an incoming call.
    ///
    /// Never touches media — a declined call acquires nothing. Goes straight
    /// to `Terminated`; calling it again after termination is a no-op.
    pub async fn reject(&self, call_id: &CallId) -> ClientResult<()> {
        let proceed = self.sessions.with_session(call_id, |s| match s.info.state {
            CallState::Terminated => Ok(false),
            CallState::Establishing if s.info.direction == CallDirection::Incoming => {
                s.pending_termination = Some(TerminationReason::Declined);
                Ok(true)
            }
            state => Err(ClientError::InvalidSessionState { call_id: *call_id, state }),
        })?;
        if !proceed {
            return Ok(());
        }

        if let Err(e) = self.transport.send(SignalMessage::Reject { call_id: *call_id }).await {
            warn!(%call_id, error = %e, "failed to send rejection");
        }
        self.settle_terminated(call_id, TerminationReason::Declined).await?;
        info!(%call_id, "incoming call declined");
        Ok(())
    }

    /// Terminate a session from any non-terminal state.
    ///
    /// The outbound signal depends on where the session is: a cancel while
    /// our own offer is unanswered, a rejection for an unanswered incoming
    /// offer, a bye once established. The session enters `Terminating` and
    /// settles to `Terminated` on acknowledgment or after the configured
    /// timeout — local completion does not depend on the remote. Calling
    /// this again while `Terminating` is a no-op; once `Terminated` it
    /// returns `SessionEnded`.
    pub async fn terminate(&self, call_id: &CallId) -> ClientResult<()> {
        let signal = self.sessions.with_session(call_id, |s| {
            let state = s.info.state;
            match state {
                CallState::Terminated => Err(ClientError::SessionEnded { call_id: *call_id }),
                CallState::Terminating => Ok(None),
                CallState::Initial | CallState::Establishing | CallState::Established => {
                    let (signal, reason) = match (state, s.info.direction) {
                        (CallState::Established, _) => {
                            (TeardownSignal::Bye, TerminationReason::LocalHangup)
                        }
                        (_, CallDirection::Incoming) => {
                            (TeardownSignal::Reject, TerminationReason::Declined)
                        }
                        (_, CallDirection::Outgoing) => {
                            (TeardownSignal::Cancel, TerminationReason::Cancelled)
                        }
                    };
                    let previous = s.transition(CallState::Terminating)?;
                    s.pending_termination = Some(reason);
                    self.dispatcher.emit(ClientEvent::CallStateChanged {
                        info: CallStatusInfo {
                            call_id: *call_id,
                            new_state: CallState::Terminating,
                            previous_state: Some(previous),
                            reason: None,
                            timestamp: Utc::now(),
                        },
                        priority: EventPriority::Normal,
                    });
                    Ok(Some(signal))
                }
            }
        })?;

        let Some(signal) = signal else {
            debug!(%call_id, "terminate called while already terminating");
            return Ok(());
        };

        let message = match signal {
            TeardownSignal::Cancel => SignalMessage::Cancel { call_id: *call_id },
            TeardownSignal::Reject => SignalMessage::Reject { call_id: *call_id },
            TeardownSignal::Bye => SignalMessage::Bye { call_id: *call_id },
        };
        if let Err(e) = self.transport.send(message).await {
            // Remote can't be told; finish locally so nothing leaks.
            warn!(%call_id, error = %e, "failed to send teardown signal");
            self.settle_terminated(call_id, TerminationReason::LocalHangup).await?;
            return Ok(());
        }

        self.spawn_terminate_watchdog(*call_id);
        info!(%call_id, "termination signaled");
        Ok(())
    }

    /// Drive a session to `Terminated` and release its media exactly once.
    ///
    /// Every termination path converges here: explicit hangup, rejection,
    /// cancellation, remote hangup, timeouts, connection loss. The terminal
    /// transition and the taking of the media handle happen atomically under
    /// the entry lock, so a second racing settle observes `Terminated`,
    /// emits nothing and releases nothing. A locally recorded teardown
    /// reason wins over the `reason` hint supplied by the settling path.
    ///
    /// Returns whether this call performed the terminal transition.
    pub(crate) async fn settle_terminated(
        &self,
        call_id: &CallId,
        reason: TerminationReason,
    ) -> ClientResult<bool> {
        self.settle_terminated_if(call_id, reason, |_| true).await
    }

    /// Like [`settle_terminated`](Self::settle_terminated), but the terminal
    /// transition only happens when `guard` approves the current state —
    /// checked under the same lock, so the decision cannot race a
    /// concurrent transition.
    pub(crate) async fn settle_terminated_if(
        &self,
        call_id: &CallId,
        reason: TerminationReason,
        guard: impl FnOnce(&CallState) -> bool,
    ) -> ClientResult<bool> {
        let taken = self.sessions.with_session(call_id, |s| {
            if s.info.state == CallState::Terminated || !guard(&s.info.state) {
                return Ok(None);
            }
            let reason = s.pending_termination.take().unwrap_or(reason);
            let previous = s.transition(CallState::Terminated)?;
            s.info.ended_at = Some(Utc::now());
            s.info.termination = Some(reason);
            self.dispatcher.emit(ClientEvent::CallStateChanged {
                info: CallStatusInfo {
                    call_id: *call_id,
                    new_state: CallState::Terminated,
                    previous_state: Some(previous),
                    reason: Some(reason.to_string()),
                    timestamp: Utc::now(),
                },
                priority: EventPriority::Normal,
            });
            Ok(Some(s.media.take()))
        })?;

        match taken {
            None => Ok(false),
            Some(media) => {
                if let Some(handle) = media {
                    self.media.release(handle).await;
                }
                info!(%call_id, "session terminated");
                Ok(true)
            }
        }
    }

    /// Cancel a call nobody answers, ours or theirs, so `Establishing` is
    /// never a parking spot.
    pub(crate) fn spawn_establish_watchdog(&self, call_id: CallId) {
        let client = self.strong();
        let timeout = self.config.establish_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let settled = client
                .settle_terminated_if(&call_id, TerminationReason::Timeout, |state| {
                    *state == CallState::Establishing
                })
                .await
                .unwrap_or(false);
            if settled {
                warn!(%call_id, "not answered within establish timeout");
                let withdrawal = match client.get_call(&call_id).map(|c| c.direction) {
                    Ok(CallDirection::Incoming) => SignalMessage::Reject { call_id },
                    _ => SignalMessage::Cancel { call_id },
                };
                let _ = client.transport.send(withdrawal).await;
            }
        });
    }

    /// Settle a terminating session the remote never acknowledges.
    fn spawn_terminate_watchdog(&self, call_id: CallId) {
        let client = self.strong();
        let timeout = self.config.terminate_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let settled = client
                .settle_terminated(&call_id, TerminationReason::LocalHangup)
                .await
                .unwrap_or(false);
            if settled {
                debug!(%call_id, "terminated without remote acknowledgment");
            }
        });
    }
}
