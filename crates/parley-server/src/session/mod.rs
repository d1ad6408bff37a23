//! Session state and the registry that owns it.
//!
//! A [`Session`] is the server-side state of one client connection: its id,
//! handshake metadata, key/value data bag and outbound push queue. Sessions
//! move through `Connecting -> Active -> Closing -> Closed`; only `Active`
//! sessions accept dispatch or push.

pub mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use parley_core::{DataBag, HandshakeData, PushMessage, SessionId, SessionValue};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::push::PushError;

pub use registry::{SessionError, SessionLimits, SessionRegistry};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake accepted, outbound queue not yet bound.
    Connecting,
    /// Serving requests and pushes.
    Active,
    /// Shutting down; new work is rejected.
    Closing,
    /// Gone.
    Closed,
}

impl SessionState {
    /// Whether data-bag reads and writes are still accepted.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

/// Server-side state bound to one client connection.
pub struct Session {
    id: SessionId,
    handshake: Option<HandshakeData>,
    limits: SessionLimits,
    state: Mutex<SessionState>,
    data: Mutex<DataBag>,
    /// Held for the duration of one dispatch.
    dispatch_lock: tokio::sync::Mutex<()>,
    outbound: Mutex<Option<mpsc::Sender<PushMessage>>>,
    closed: CancellationToken,
    created_at: Instant,
    dropped_pushes: AtomicU64,
}

impl Session {
    pub(crate) fn new(id: SessionId, handshake: Option<HandshakeData>, limits: SessionLimits) -> Self {
        Self {
            id,
            handshake,
            limits,
            state: Mutex::new(SessionState::Connecting),
            data: Mutex::new(DataBag::new()),
            dispatch_lock: tokio::sync::Mutex::new(()),
            outbound: Mutex::new(None),
            closed: CancellationToken::new(),
            created_at: Instant::now(),
            dropped_pushes: AtomicU64::new(0),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Handshake metadata captured at connect time.
    pub fn handshake(&self) -> Option<&HandshakeData> {
        self.handshake.as_ref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether the session accepts dispatch and push.
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Snapshot of the data bag.
    pub fn data(&self) -> Result<DataBag, SessionError> {
        self.ensure_live()?;
        Ok(self.data.lock().clone())
    }

    /// Single value from the data bag.
    pub fn get(&self, key: &str) -> Result<Option<SessionValue>, SessionError> {
        self.ensure_live()?;
        Ok(self.data.lock().get(key).cloned())
    }

    /// Merge `updates` into the data bag, replacing only the given keys.
    ///
    /// Every entry is validated before anything is written, and the write
    /// happens in one critical section with no await points, so the bag is
    /// either fully updated or untouched.
    pub fn set_data(&self, updates: DataBag) -> Result<(), SessionError> {
        self.ensure_live()?;
        let mut data = self.data.lock();
        self.limits.check_update(&data, &updates)?;
        data.extend(updates);
        Ok(())
    }

    /// Set one key.
    pub fn set(&self, key: impl Into<String>, value: impl Into<SessionValue>) -> Result<(), SessionError> {
        let mut updates = DataBag::new();
        let _ = updates.insert(key.into(), value.into());
        self.set_data(updates)
    }

    /// Remove one key, returning its previous value.
    pub fn remove(&self, key: &str) -> Result<Option<SessionValue>, SessionError> {
        self.ensure_live()?;
        Ok(self.data.lock().remove(key))
    }

    /// Drop every key.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.data.lock().clear();
        Ok(())
    }

    /// Token cancelled when the session starts closing.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Pushes that could not be enqueued.
    pub fn drop_count(&self) -> u64 {
        self.dropped_pushes.load(Ordering::Relaxed)
    }

    pub(crate) async fn lock_dispatch(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.dispatch_lock.lock().await
    }

    /// Bind the outbound queue and move `Connecting -> Active`.
    pub(crate) fn activate(&self, tx: mpsc::Sender<PushMessage>) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if *state != SessionState::Connecting {
            return Err(SessionError::InvalidTransition {
                id: self.id.clone(),
                from: *state,
                to: SessionState::Active,
            });
        }
        *self.outbound.lock() = Some(tx);
        *state = SessionState::Active;
        Ok(())
    }

    /// Move to `Closing`, cancel in-flight work and drop the outbound queue.
    ///
    /// Returns `false` if the session was already closing or closed.
    pub(crate) fn begin_close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.is_live() {
                return false;
            }
            *state = SessionState::Closing;
        }
        self.closed.cancel();
        drop(self.outbound.lock().take());
        true
    }

    pub(crate) fn finish_close(&self) {
        *self.state.lock() = SessionState::Closed;
    }

    /// Enqueue a push without waiting.
    pub(crate) fn try_push(&self, message: PushMessage) -> Result<(), PushError> {
        if !self.is_active() {
            return Err(PushError::SessionNotFound(self.id.clone()));
        }
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(PushError::SessionNotFound(self.id.clone()));
        };
        let result = match tx.try_send(message) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => PushError::QueueFull(self.id.clone()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                PushError::ConnectionClosed(self.id.clone())
            }
        };
        let _ = self.dropped_pushes.fetch_add(1, Ordering::Relaxed);
        Err(result)
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.state().is_live() {
            Ok(())
        } else {
            Err(SessionError::NotFound(self.id.clone()))
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Shared handle to a session.
pub type SessionHandle = Arc<Session>;
