//! WebSocket gateway: JSON frames in, dispatcher calls, JSON frames out.
//!
//! The gateway owns nothing but connection plumbing. Sessions live in the
//! [`SessionRegistry`](crate::session::SessionRegistry) and every request
//! goes through [`Dispatcher::handle`].

pub mod frames;
pub mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::route::RouteDictionary;

pub use frames::{ClientFrame, FrameError, RouteRef, ServerFrame};
pub use session::run_ws_session;

/// Shared state for every WebSocket connection.
pub struct Gateway {
    dispatcher: Arc<Dispatcher>,
    dictionary: Arc<RouteDictionary>,
    heartbeat: Duration,
    shutdown: CancellationToken,
    connections: AtomicUsize,
}

impl Gateway {
    /// Create a gateway in front of `dispatcher`.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        dictionary: RouteDictionary,
        heartbeat: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            dictionary: Arc::new(dictionary),
            heartbeat,
            shutdown,
            connections: AtomicUsize::new(0),
        }
    }

    /// The dispatcher requests are sent to.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Route dictionary advertised in the handshake.
    pub fn dictionary(&self) -> &RouteDictionary {
        &self.dictionary
    }

    /// Heartbeat interval advertised in the handshake.
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Open WebSocket connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        let _ = self.connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            gateway: self.clone(),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("heartbeat", &self.heartbeat)
            .field("connections", &self.connections())
            .finish_non_exhaustive()
    }
}

/// Decrements the connection count on drop.
pub(crate) struct ConnectionGuard {
    gateway: Arc<Gateway>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.gateway.connections.fetch_sub(1, Ordering::Relaxed);
    }
}
