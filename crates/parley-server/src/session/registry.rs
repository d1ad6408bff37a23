//! Session registry: connection identity to session state.
//!
//! Backed by a sharded `DashMap`, so lookups for different sessions never
//! contend on one lock and no map lock is held while a handler runs.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_core::errors::{self as codes};
use parley_core::{
    DataBag, ErrorKind, HandlerError, HandshakeData, PushMessage, SessionId, SessionValue,
};
use parley_settings::SessionSettings;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Session, SessionState};

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No live session with this id.
    #[error("session '{0}' not found")]
    NotFound(SessionId),
    /// A live session already uses this id.
    #[error("session '{0}' already exists")]
    AlreadyExists(SessionId),
    /// Lifecycle transition not allowed from the current state.
    #[error("session '{id}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// Session id.
        id: SessionId,
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },
    /// Data-bag update rejected.
    #[error("{0}")]
    Validation(String),
}

impl From<SessionError> for HandlerError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::NotFound(_) => {
                HandlerError::new(codes::NOT_FOUND, message).with_kind(ErrorKind::SessionNotFound)
            }
            SessionError::Validation(_) => HandlerError::new(codes::BAD_REQUEST, message)
                .with_kind(ErrorKind::ValidationError),
            SessionError::AlreadyExists(_) | SessionError::InvalidTransition { .. } => {
                HandlerError::unknown(message)
            }
        }
    }
}

/// Size limits applied to data-bag updates, plus the push queue capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    /// Capacity of each session's outbound push queue.
    pub push_buffer: usize,
    /// Maximum number of keys in one bag.
    pub max_data_keys: usize,
    /// Maximum key length in bytes.
    pub max_key_length: usize,
    /// Maximum value nesting depth.
    pub max_value_depth: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for SessionLimits {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            push_buffer: settings.push_buffer.max(1),
            max_data_keys: settings.max_data_keys,
            max_key_length: settings.max_key_length,
            max_value_depth: settings.max_value_depth,
        }
    }
}

impl SessionLimits {
    /// Validate a per-key merge of `updates` into `current`.
    pub fn check_update(&self, current: &DataBag, updates: &DataBag) -> Result<(), SessionError> {
        for (key, value) in updates {
            if key.is_empty() {
                return Err(SessionError::Validation("data key must not be empty".into()));
            }
            if key.len() > self.max_key_length {
                return Err(SessionError::Validation(format!(
                    "data key '{key}' exceeds maximum length ({} > {})",
                    key.len(),
                    self.max_key_length
                )));
            }
            if value.depth() > self.max_value_depth {
                return Err(SessionError::Validation(format!(
                    "value for '{key}' exceeds maximum depth ({} > {})",
                    value.depth(),
                    self.max_value_depth
                )));
            }
            if !value.is_finite() {
                return Err(SessionError::Validation(format!(
                    "value for '{key}' contains a non-finite number"
                )));
            }
        }
        let new_keys = updates.keys().filter(|k| !current.contains_key(*k)).count();
        let total = current.len() + new_keys;
        if total > self.max_data_keys {
            return Err(SessionError::Validation(format!(
                "data bag would hold {total} keys (max {})",
                self.max_data_keys
            )));
        }
        Ok(())
    }
}

/// Owns every live session.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    limits: SessionLimits,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: DashMap::new(),
            limits,
        }
    }

    /// Limits applied to new sessions.
    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Create a session in the `Connecting` state.
    pub fn create(
        &self,
        id: SessionId,
        handshake: Option<HandshakeData>,
    ) -> Result<Arc<Session>, SessionError> {
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(SessionError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(id, handshake, self.limits));
                let _ = slot.insert(session.clone());
                debug!(session_id = %session.id(), "session created");
                Ok(session)
            }
        }
    }

    /// Bind a fresh outbound queue and move the session to `Active`.
    ///
    /// Returns the receiving end for the transport's writer task.
    pub fn activate(&self, id: &SessionId) -> Result<mpsc::Receiver<PushMessage>, SessionError> {
        let session = self.lookup(id)?;
        let (tx, rx) = mpsc::channel(self.limits.push_buffer);
        session.activate(tx)?;
        info!(session_id = %id, "session active");
        Ok(rx)
    }

    /// Live (connecting or active) session by id.
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        let session = self.lookup(id)?;
        if session.state().is_live() {
            Ok(session)
        } else {
            Err(SessionError::NotFound(id.clone()))
        }
    }

    /// Active session by id.
    pub fn get_active(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        let session = self.lookup(id)?;
        if session.is_active() {
            Ok(session)
        } else {
            Err(SessionError::NotFound(id.clone()))
        }
    }

    /// Close and forget a session. Unknown ids are a no-op.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|entry| entry.value().clone())?;
        self.evict(id, &session);
        Some(session)
    }

    /// Close `session` and unmap `id` only while it still maps to that
    /// session, so a stale close never evicts a newer one.
    fn evict(&self, id: &SessionId, session: &Arc<Session>) {
        let closed_now = session.begin_close();
        let _ = self
            .sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, session));
        session.finish_close();
        if closed_now {
            info!(session_id = %id, age_secs = session.age().as_secs(), "session closed");
        }
    }

    /// Close every session (shutdown path).
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let count = ids.len();
        for id in ids {
            let _ = self.remove(&id);
        }
        count
    }

    /// Snapshot of a session's data bag.
    pub fn get_data(&self, id: &SessionId) -> Result<DataBag, SessionError> {
        self.get(id)?.data()
    }

    /// Per-key merge of `updates` into a session's data bag.
    pub fn set_data(&self, id: &SessionId, updates: DataBag) -> Result<(), SessionError> {
        self.get(id)?.set_data(updates)
    }

    /// Remove one key from a session's data bag.
    pub fn remove_data(
        &self,
        id: &SessionId,
        key: &str,
    ) -> Result<Option<SessionValue>, SessionError> {
        self.get(id)?.remove(key)
    }

    /// Drop every key from a session's data bag.
    pub fn clear_data(&self, id: &SessionId) -> Result<(), SessionError> {
        self.get(id)?.clear()
    }

    /// Number of sessions in the registry, any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of `Active` sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.value().is_active()).count()
    }

    fn lookup(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}
