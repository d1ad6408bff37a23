//! Per-call context handed to route handlers.

use std::sync::Arc;

use parley_core::{SessionId, TraceContext};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::push::{PushChannel, PushError};
use crate::route::Route;
use crate::session::Session;

/// What a handler knows about the call it is serving.
///
/// The session handle is passed explicitly; handlers never look sessions up
/// by ambient state.
pub struct HandlerContext {
    session: Arc<Session>,
    push: PushChannel,
    route: Route,
    request_id: Option<u64>,
    trace: Option<TraceContext>,
}

impl HandlerContext {
    pub(crate) fn new(
        session: Arc<Session>,
        push: PushChannel,
        route: Route,
        request_id: Option<u64>,
        trace: Option<TraceContext>,
    ) -> Self {
        Self {
            session,
            push,
            route,
            request_id,
            trace,
        }
    }

    /// The calling session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Id of the calling session.
    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// Route being served.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Request id, `None` for notifies.
    pub fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    /// Trace context supplied by the client, passed through unchanged.
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Cancelled when the calling session closes.
    pub fn cancelled(&self) -> CancellationToken {
        self.session.close_token()
    }

    /// Push a message to the calling session's connection.
    pub fn push(&self, route: impl Into<String>, body: Value) -> Result<(), PushError> {
        self.push.push(self.session.id(), route, body)
    }

    /// Push channel for delivering to other sessions.
    pub fn push_channel(&self) -> &PushChannel {
        &self.push
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("session", self.session.id())
            .field("route", &self.route.to_string())
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
