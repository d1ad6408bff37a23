//! JSON frames exchanged over the WebSocket.
//!
//! Every frame is an object tagged by `"type"`. Client requests may omit the
//! tag; a request without an `id` is a notify.

use std::collections::BTreeMap;

use parley_core::{
    HandshakeClientData, HandshakeData, PushMessage, Response, SessionValue, TraceContext,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::route::RouteDictionary;

/// Handshake accepted.
pub const HANDSHAKE_OK: u16 = 200;

/// Route given by name or by dictionary code.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RouteRef {
    /// Compressed route.
    Code(u16),
    /// Full route name.
    Name(String),
}

impl RouteRef {
    /// Expand to a route name using `dictionary`.
    pub fn resolve(self, dictionary: &RouteDictionary) -> Result<String, FrameError> {
        match self {
            Self::Name(name) => Ok(name),
            Self::Code(code) => dictionary
                .route(code)
                .map(str::to_owned)
                .ok_or(FrameError::UnknownRouteCode(code)),
        }
    }
}

/// A decoded client frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientFrame {
    /// First frame of every connection.
    Handshake(HandshakeData),
    /// A call; `id == None` marks a notify.
    Request {
        /// Correlation id.
        id: Option<u64>,
        /// Target route.
        route: RouteRef,
        /// Call body.
        body: Value,
        /// Client trace context.
        trace: Option<TraceContext>,
    },
}

/// Frame decoding failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not valid JSON, or wrong shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// `type` is not one we accept from clients.
    #[error("unsupported frame type '{0}'")]
    UnsupportedType(String),
    /// Request frame without a route.
    #[error("request frame is missing 'route'")]
    MissingRoute,
    /// Numeric route not in the dictionary.
    #[error("unknown route code {0}")]
    UnknownRouteCode(u16),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    route: Option<RouteRef>,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    trace: Option<TraceContext>,
    #[serde(default)]
    sys: HandshakeClientData,
    #[serde(default)]
    user: BTreeMap<String, SessionValue>,
}

impl ClientFrame {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        match raw.kind.as_deref() {
            Some("handshake") => Ok(Self::Handshake(HandshakeData {
                sys: raw.sys,
                user: raw.user,
            })),
            Some("request") | None => Self::request(raw.id, raw.route, raw.body, raw.trace),
            Some("notify") => Self::request(None, raw.route, raw.body, raw.trace),
            Some(other) => Err(FrameError::UnsupportedType(other.to_owned())),
        }
    }

    fn request(
        id: Option<u64>,
        route: Option<RouteRef>,
        body: Value,
        trace: Option<TraceContext>,
    ) -> Result<Self, FrameError> {
        Ok(Self::Request {
            id,
            route: route.ok_or(FrameError::MissingRoute)?,
            body,
            trace,
        })
    }

    /// Best-effort request id from an undecodable frame.
    pub fn sniff_id(text: &str) -> Option<u64> {
        serde_json::from_str::<Value>(text)
            .ok()?
            .get("id")
            .and_then(Value::as_u64)
    }
}

/// `sys` block of the handshake reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HandshakeSys {
    /// Seconds between heartbeats.
    pub heartbeat: u64,
    /// Route dictionary.
    pub dict: BTreeMap<String, u16>,
    /// Session id assigned to the connection.
    pub session: String,
}

/// A frame sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Handshake reply.
    Handshake {
        /// `200` on success.
        code: u16,
        /// Connection parameters.
        sys: HandshakeSys,
    },
    /// Reply to a request.
    Response(Response),
    /// Server-initiated message.
    Push(PushMessage),
}

impl ServerFrame {
    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
