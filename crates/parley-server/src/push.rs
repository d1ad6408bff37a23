//! Server-initiated delivery to a session's connection.

use std::sync::Arc;

use metrics::counter;
use parley_core::errors as codes;
use parley_core::{ErrorKind, HandlerError, PushMessage, SessionId};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{PUSH_DROPS_TOTAL, PUSH_SENT_TOTAL};
use crate::session::SessionRegistry;

/// Reasons a push could not be enqueued.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PushError {
    /// Session unknown, or not `Active`.
    #[error("session '{0}' not found")]
    SessionNotFound(SessionId),
    /// Outbound queue is at capacity.
    #[error("outbound queue full for session '{0}'")]
    QueueFull(SessionId),
    /// Transport writer already gone.
    #[error("connection closed for session '{0}'")]
    ConnectionClosed(SessionId),
}

impl PushError {
    /// Short label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::QueueFull(_) => "queue_full",
            Self::ConnectionClosed(_) => "connection_closed",
        }
    }
}

impl From<PushError> for HandlerError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::SessionNotFound(_) => HandlerError::new(codes::NOT_FOUND, err.to_string())
                .with_kind(ErrorKind::SessionNotFound),
            PushError::QueueFull(_) | PushError::ConnectionClosed(_) => {
                HandlerError::unknown(err.to_string())
            }
        }
    }
}

/// Enqueues pushes onto per-session outbound queues.
///
/// Never awaits: a full queue is reported immediately.
#[derive(Clone)]
pub struct PushChannel {
    sessions: Arc<SessionRegistry>,
}

impl PushChannel {
    /// Create a push channel over the given registry.
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// Push `body` on `route` to one session.
    pub fn push(
        &self,
        session_id: &SessionId,
        route: impl Into<String>,
        body: Value,
    ) -> Result<(), PushError> {
        let message = PushMessage::new(route, body);
        let result = match self.sessions.get_active(session_id) {
            Ok(session) => session.try_push(message),
            Err(_) => Err(PushError::SessionNotFound(session_id.clone())),
        };
        match &result {
            Ok(()) => {
                counter!(PUSH_SENT_TOTAL).increment(1);
                debug!(session_id = %session_id, "push enqueued");
            }
            Err(err) => {
                counter!(PUSH_DROPS_TOTAL, "reason" => err.reason()).increment(1);
                warn!(session_id = %session_id, reason = err.reason(), "push not delivered");
            }
        }
        result
    }

    /// Push the same message to several sessions. Returns the failures.
    pub fn push_many<'a>(
        &self,
        session_ids: impl IntoIterator<Item = &'a SessionId>,
        route: &str,
        body: &Value,
    ) -> Vec<(SessionId, PushError)> {
        session_ids
            .into_iter()
            .filter_map(|id| {
                self.push(id, route, body.clone())
                    .err()
                    .map(|err| (id.clone(), err))
            })
            .collect()
    }
}

impl std::fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushChannel").finish_non_exhaustive()
    }
}
