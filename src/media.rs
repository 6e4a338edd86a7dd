//! Media collaborator seam
//!
//! The session core never captures or processes media itself. Each session
//! exclusively owns an opaque [`MediaHandle`] obtained from a [`MediaEngine`]
//! implementation supplied by the application, and releases it exactly once
//! when the session terminates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::call::CallId;

/// Media requested for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaOptions {
    /// Capture and send audio
    pub audio: bool,
    /// Capture and send video
    pub video: bool,
}

impl MediaOptions {
    /// Audio-only call, the common case
    pub fn audio_only() -> Self {
        Self { audio: true, video: false }
    }

    /// Audio and video call
    pub fn audio_video() -> Self {
        Self { audio: true, video: true }
    }
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self::audio_only()
    }
}

/// Opaque token for acquired media resources
///
/// Minted by the [`MediaEngine`] on `acquire` and meaningful only to it. The
/// owning session stores the handle and surrenders it back through `release`
/// on termination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle(pub String);

impl std::fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by the media collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    /// Devices could not be opened for the requested constraints
    #[error("media acquisition failed: {reason}")]
    AcquisitionFailed {
        /// Description from the media layer
        reason: String,
    },
    /// An operation on already-acquired media failed
    #[error("media operation failed: {reason}")]
    OperationFailed {
        /// Description from the media layer
        reason: String,
    },
}

/// Media subsystem consumed by the session core
///
/// Implementations wrap whatever actually negotiates and moves media (a
/// WebRTC stack, an RTP engine, a test double). The core only ever calls the
/// five operations below, always against a handle owned by a single session.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Acquire local media resources for the given constraints.
    ///
    /// Called before an outgoing offer is sent, and when answering an
    /// incoming call. Never called for a call that is declined.
    async fn acquire(&self, options: &MediaOptions) -> Result<MediaHandle, MediaError>;

    /// Bind acquired media to a session so negotiation can complete.
    async fn attach(&self, handle: &MediaHandle, call_id: &CallId) -> Result<(), MediaError>;

    /// Renegotiate media direction for hold/resume.
    async fn set_hold(&self, handle: &MediaHandle, held: bool) -> Result<(), MediaError>;

    /// Enable or disable outbound audio locally. No remote signaling.
    async fn set_muted(&self, handle: &MediaHandle, muted: bool) -> Result<(), MediaError>;

    /// Release the resources behind the handle.
    ///
    /// The core guarantees each handle is released at most once, regardless
    /// of which termination path the owning session took.
    async fn release(&self, handle: MediaHandle);
}
