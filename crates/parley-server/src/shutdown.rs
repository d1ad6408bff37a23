//! Server drain on shutdown.
//!
//! Triggering the drain cancels one token shared by the HTTP listener and
//! every connection loop. [`ShutdownCoordinator::drain`] then closes all
//! sessions, which cancels their in-flight dispatches, and waits for the
//! serve tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::SessionRegistry;

/// Wait limit for serve tasks when the caller gives none.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of [`ShutdownCoordinator::drain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainReport {
    /// Sessions that were still live when the drain started.
    pub sessions_closed: usize,
    /// Whether some serve task outlived the timeout.
    pub timed_out: bool,
}

/// Owns the drain token and the sessions it has to close.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: Arc<SessionRegistry>,
}

impl ShutdownCoordinator {
    /// Coordinator for the sessions in `sessions`.
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            token: CancellationToken::new(),
            sessions,
        }
    }

    /// Token cancelled when the drain starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting connections. Sessions stay open until [`Self::drain`].
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether the drain has started.
    pub fn is_draining(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger, close every session, then wait up to `timeout` for `handles`.
    pub async fn drain(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> DrainReport {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.trigger();

        let sessions_closed = self.sessions.close_all();
        info!(
            sessions_closed,
            tasks = handles.len(),
            timeout_secs = timeout.as_secs(),
            "draining server"
        );

        let timed_out = tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err();
        if timed_out {
            warn!(?timeout, "drain timed out, serve tasks still running");
        }
        DrainReport {
            sessions_closed,
            timed_out,
        }
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("draining", &self.is_draining())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
