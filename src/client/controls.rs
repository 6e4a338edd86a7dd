//! In-call controls: hold, mute, DTMF
//!
//! All three are valid only while a call is `Established`. `held` and
//! `muted` are first-class session attributes — the media engine is told the
//! new value but is never consulted for the current one, so the session
//! record cannot drift from what the engine believes.

use tracing::{info, warn};

use crate::call::{CallId, CallState};
use crate::error::{ClientError, ClientResult};
use crate::media::MediaHandle;
use crate::transport::SignalMessage;

use super::manager::SessionClient;

impl SessionClient {
    /// Flip the hold state of an established call.
    ///
    /// Renegotiates media direction with the remote through the media
    /// engine. Returns the new hold state. If the engine refuses, the flag
    /// is rolled back and the error surfaced.
    pub async fn toggle_hold(&self, call_id: &CallId) -> ClientResult<bool> {
        let (handle, held) = self.flip_flag(call_id, |s| {
            s.info.held = !s.info.held;
            s.info.held
        })?;

        if let Err(e) = self.media.set_hold(&handle, held).await {
            warn!(%call_id, error = %e, "hold renegotiation failed");
            let _ = self.sessions.with_session(call_id, |s| {
                s.info.held = !held;
                Ok(())
            });
            return Err(ClientError::MediaFailure { reason: e.to_string() });
        }
        info!(%call_id, held, "hold toggled");
        Ok(held)
    }

    /// Flip the mute state of an established call.
    ///
    /// Disables or enables outbound audio locally; no renegotiation and no
    /// remote signaling. Returns the new mute state.
    pub async fn toggle_mute(&self, call_id: &CallId) -> ClientResult<bool> {
        let (handle, muted) = self.flip_flag(call_id, |s| {
            s.info.muted = !s.info.muted;
            s.info.muted
        })?;

        if let Err(e) = self.media.set_muted(&handle, muted).await {
            warn!(%call_id, error = %e, "mute change failed");
            let _ = self.sessions.with_session(call_id, |s| {
                s.info.muted = !muted;
                Ok(())
            });
            return Err(ClientError::MediaFailure { reason: e.to_string() });
        }
        info!(%call_id, muted, "mute toggled");
        Ok(muted)
    }

    /// Send DTMF digits out-of-band on an established call.
    ///
    /// Accepts `0-9`, `*`, `#` and `A-D` (case-insensitive).
    pub async fn send_dtmf(&self, call_id: &CallId, digits: &str) -> ClientResult<()> {
        if digits.is_empty()
            || !digits
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c.to_ascii_uppercase(), '*' | '#' | 'A'..='D'))
        {
            return Err(ClientError::InvalidDigits { digits: digits.to_string() });
        }

        self.sessions.with_session(call_id, |s| match s.info.state {
            CallState::Established => Ok(()),
            state => Err(ClientError::InvalidSessionState { call_id: *call_id, state }),
        })?;

        self.transport
            .send(SignalMessage::Dtmf { call_id: *call_id, digits: digits.to_string() })
            .await
            .map_err(|e| ClientError::NetworkError { reason: e.to_string() })?;
        info!(%call_id, digits, "dtmf sent");
        Ok(())
    }

    /// Whether an established (or any known) call is on hold
    pub fn is_on_hold(&self, call_id: &CallId) -> ClientResult<bool> {
        Ok(self.sessions.snapshot(call_id)?.held)
    }

    /// Whether a call's outbound audio is muted
    pub fn is_muted(&self, call_id: &CallId) -> ClientResult<bool> {
        Ok(self.sessions.snapshot(call_id)?.muted)
    }

    /// Validate `Established`, flip a flag under the lock, and hand back
    /// the media handle for the engine call.
    fn flip_flag(
        &self,
        call_id: &CallId,
        flip: impl FnOnce(&mut crate::session::Session) -> bool,
    ) -> ClientResult<(MediaHandle, bool)> {
        self.sessions.with_session(call_id, |s| {
            if s.info.state != CallState::Established {
                return Err(ClientError::InvalidSessionState {
                    call_id: *call_id,
                    state: s.info.state,
                });
            }
            let handle = s.media.clone().ok_or_else(|| ClientError::InternalError {
                message: format!("established session {call_id} has no media handle"),
            })?;
            let value = flip(s);
            Ok((handle, value))
        })
    }
}
