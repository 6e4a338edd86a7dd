//! Session store
//!
//! The single source of truth for which call sessions exist. The store is an
//! explicitly constructed instance (injectable, so independent clients and
//! tests get independent stores) wrapping a concurrent map keyed by
//! [`CallId`].
//!
//! Every read-modify-write goes through [`SessionStore::with_session`], which
//! runs the caller's closure under the map entry's lock: "look up, check
//! state, transition" is one atomic unit, and racing transitions for the same
//! session serialize against each other. Closures must not block or await.

use chrono::Utc;
use dashmap::DashMap;

use crate::call::{CallDirection, CallId, CallInfo, CallState, TerminationReason};
use crate::error::{ClientError, ClientResult};
use crate::media::{MediaHandle, MediaOptions};

/// Internal per-call record
///
/// Wraps the public [`CallInfo`] snapshot with the state only the core may
/// touch: the exclusively-owned media handle, the answer-in-progress guard,
/// and the termination reason chosen when teardown was initiated locally.
#[derive(Debug)]
pub(crate) struct Session {
    /// Public attributes; cloned out for snapshots
    pub info: CallInfo,
    /// Media resources owned by this session. Taken exactly once, on the
    /// transition into `Terminated`, which makes release idempotent-safe
    /// against racing termination paths.
    pub media: Option<MediaHandle>,
    /// Set while an answer is acquiring media, so a second concurrent
    /// answer fails instead of acquiring devices twice
    pub answering: bool,
    /// Reason recorded when local teardown was initiated, preferred over
    /// the hint supplied by whichever event finally settles the session
    pub pending_termination: Option<TerminationReason>,
}

impl Session {
    /// New outgoing session in `Initial` state
    pub fn outgoing(call_id: CallId, local_uri: String, remote_uri: String, media: MediaOptions) -> Self {
        Self::new(call_id, CallDirection::Outgoing, local_uri, remote_uri, None, media)
    }

    /// New incoming session in `Initial` state
    pub fn incoming(
        call_id: CallId,
        local_uri: String,
        remote_uri: String,
        remote_display_name: Option<String>,
        media: MediaOptions,
    ) -> Self {
        Self::new(call_id, CallDirection::Incoming, local_uri, remote_uri, remote_display_name, media)
    }

    fn new(
        call_id: CallId,
        direction: CallDirection,
        local_uri: String,
        remote_uri: String,
        remote_display_name: Option<String>,
        media: MediaOptions,
    ) -> Self {
        Self {
            info: CallInfo {
                call_id,
                state: CallState::Initial,
                direction,
                local_uri,
                remote_uri,
                remote_display_name,
                held: false,
                muted: false,
                media,
                created_at: Utc::now(),
                connected_at: None,
                ended_at: None,
                termination: None,
            },
            media: None,
            answering: false,
            pending_termination: None,
        }
    }

    /// Move to `next`, returning the previous state.
    ///
    /// Callers validate operation preconditions before getting here; an
    /// illegal edge at this point is a core bug, reported as an internal
    /// error rather than a caller-facing state error.
    pub fn transition(&mut self, next: CallState) -> ClientResult<CallState> {
        let previous = self.info.state;
        if !previous.can_transition_to(&next) {
            return Err(ClientError::InternalError {
                message: format!(
                    "illegal transition {previous} -> {next} for session {}",
                    self.info.call_id
                ),
            });
        }
        self.info.state = next;
        tracing::debug!(call_id = %self.info.call_id, %previous, state = %next, "session transition");
        Ok(previous)
    }
}

/// Concurrency-safe mapping from session id to session state
pub struct SessionStore {
    sessions: DashMap<CallId, Session>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Insert a freshly created session.
    ///
    /// Session ids are generated (or transport-assigned) uuids and never
    /// reused; a duplicate here means a collaborator bug.
    pub(crate) fn insert(&self, session: Session) -> ClientResult<()> {
        let call_id = session.info.call_id;
        match self.sessions.entry(call_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ClientError::InternalError {
                message: format!("session id {call_id} already exists"),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
                tracing::debug!(%call_id, "session stored");
                Ok(())
            }
        }
    }

    /// Run `f` against the session under its entry lock.
    ///
    /// Returns `SessionNotFound` when the id is unknown. The closure must
    /// not await and must not touch other store entries.
    pub(crate) fn with_session<F, T>(&self, call_id: &CallId, f: F) -> ClientResult<T>
    where
        F: FnOnce(&mut Session) -> ClientResult<T>,
    {
        match self.sessions.get_mut(call_id) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(ClientError::SessionNotFound { call_id: *call_id }),
        }
    }

    /// Snapshot a single session's public attributes
    pub fn snapshot(&self, call_id: &CallId) -> ClientResult<CallInfo> {
        self.sessions
            .get(call_id)
            .map(|entry| entry.info.clone())
            .ok_or(ClientError::SessionNotFound { call_id: *call_id })
    }

    /// Whether a session with this id exists (in any state)
    pub fn contains(&self, call_id: &CallId) -> bool {
        self.sessions.contains_key(call_id)
    }

    /// Owned snapshot of all non-terminal sessions
    pub fn active_calls(&self) -> Vec<CallInfo> {
        self.sessions
            .iter()
            .filter(|entry| entry.info.state.is_active())
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Owned snapshot of every session, terminated ones included
    pub fn call_history(&self) -> Vec<CallInfo> {
        self.sessions.iter().map(|entry| entry.info.clone()).collect()
    }

    /// Ids of all non-terminal sessions, for bulk teardown
    pub fn active_ids(&self) -> Vec<CallId> {
        self.sessions
            .iter()
            .filter(|entry| entry.info.state.is_active())
            .map(|entry| entry.info.call_id)
            .collect()
    }

    /// Number of non-terminal sessions
    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|entry| entry.info.state.is_active()).count()
    }

    /// Number of sessions ever stored and still retained
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions at all
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
