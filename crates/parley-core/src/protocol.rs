//! Decoded request/response envelopes.
//!
//! The core never sees raw bytes: a transport decodes frames into
//! [`Request`]s, hands them to the dispatcher, and encodes the returned
//! [`Response`]s. Server-initiated messages travel as [`PushMessage`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorBody, ErrorKind};
use crate::ids::SessionId;

/// Propagated tracing context, passed through to handlers untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    /// Distributed trace identifier.
    pub trace_id: String,
    /// Parent span identifier, if the caller has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Baggage items forwarded to downstream calls.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baggage: BTreeMap<String, String>,
}

/// A decoded call from a client.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Message id; `None` marks a notify whose response is discarded.
    pub id: Option<u64>,
    /// Route name (e.g. `connector.getsessiondata`).
    pub route: String,
    /// Opaque handler payload.
    pub payload: Value,
    /// Originating session.
    pub session_id: SessionId,
    /// Optional tracing context.
    pub trace: Option<TraceContext>,
}

impl Request {
    /// Build a notify-style request (no id).
    pub fn new(session_id: SessionId, route: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            route: route.into(),
            payload,
            session_id,
            trace: None,
        }
    }

    /// Attach a message id, turning the notify into a request.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Attach a tracing context.
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Whether the caller expects no response.
    pub fn is_notify(&self) -> bool {
        self.id.is_none()
    }
}

/// Result of dispatching a [`Request`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Echoed message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Echoed route name.
    pub route: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Result payload (present when `success == true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Error payload (present when `success == false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Build a success response.
    pub fn success(id: Option<u64>, route: impl Into<String>, body: Value) -> Self {
        Self {
            id,
            route: route.into(),
            success: true,
            body: Some(body),
            error: None,
        }
    }

    /// Build an error response from a prepared body.
    pub fn failure(id: Option<u64>, route: impl Into<String>, error: ErrorBody) -> Self {
        Self {
            id,
            route: route.into(),
            success: false,
            body: None,
            error: Some(error),
        }
    }

    /// Build an error response.
    pub fn error(
        id: Option<u64>,
        route: impl Into<String>,
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::failure(id, route, ErrorBody::new(kind, code, message))
    }

    /// Kind of the error, if this is an error response.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Server-initiated message delivered outside request/response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Client-side route the message is addressed to.
    pub route: String,
    /// Message payload.
    pub body: Value,
}

impl PushMessage {
    /// Create a push message.
    pub fn new(route: impl Into<String>, body: Value) -> Self {
        Self {
            route: route.into(),
            body,
        }
    }
}
