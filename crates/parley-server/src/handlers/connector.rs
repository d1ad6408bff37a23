//! `connector.*` handlers: session data access, pushes and error replies.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::{DataBag, ErrorKind, HandlerError, bag_from_json, bag_to_json};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{Instrument, debug, info_span, warn};

use crate::dispatch::HandlerContext;
use crate::route::{Component, Handler};

/// Code attached to failed data-bag writes.
pub const SET_DATA_FAILED: &str = "CN-000";

/// Route the `sendpush` handler pushes on.
pub const PUSH_ROUTE: &str = "some.push.route";

/// Generic `{Code, Msg}` reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reply {
    /// Status code, 200 on success.
    pub code: i32,
    /// Human-readable status.
    pub msg: String,
}

impl Reply {
    fn ok(msg: &str) -> Self {
        Self {
            code: 200,
            msg: msg.to_owned(),
        }
    }
}

/// `{Data}` reply carrying a session's data bag.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionDataReply {
    /// Data bag contents.
    pub data: Value,
}

/// The `connector` component.
#[derive(Clone, Copy, Debug, Default)]
pub struct Connector;

impl Component for Connector {
    fn methods(&self) -> Vec<(&'static str, Arc<dyn Handler>)> {
        vec![
            ("gethandshakedata", Arc::new(GetHandshakeData)),
            ("getsessiondata", Arc::new(GetSessionData)),
            ("setsessiondata", Arc::new(SetSessionData)),
            ("notifysessiondata", Arc::new(NotifySessionData)),
            ("sendpush", Arc::new(SendPush)),
            ("geterror", Arc::new(GetError)),
            ("tracedcall", Arc::new(TracedCall::default())),
        ]
    }
}

/// Route dictionary advertised to clients of the connector server.
pub fn default_dictionary() -> BTreeMap<String, u16> {
    [
        ("connector.getsessiondata", 1),
        ("connector.setsessiondata", 2),
        ("room.room.getsessiondata", 3),
        ("onMessage", 4),
        ("onMembers", 5),
        ("connector.geterror", 6),
    ]
    .into_iter()
    .map(|(name, code)| (name.to_owned(), code))
    .collect()
}

fn to_value(reply: impl Serialize) -> Result<Value, HandlerError> {
    serde_json::to_value(reply).map_err(|e| HandlerError::wrap(&e, parley_core::errors::INTERNAL))
}

fn set_data_error(message: impl Into<String>) -> HandlerError {
    HandlerError::new(SET_DATA_FAILED, message)
        .with_metadata("failed", "set data")
        .with_kind(ErrorKind::ValidationError)
}

/// Accepts either `{"Data": {...}}` or a bare object.
fn parse_data(payload: Value) -> Result<DataBag, HandlerError> {
    let payload = match payload {
        Value::Object(mut map) if map.len() == 1 && map.get("Data").is_some_and(Value::is_object) => {
            map.remove("Data").unwrap_or_default()
        }
        other => other,
    };
    bag_from_json(payload).map_err(|e| set_data_error(e.to_string()))
}

fn apply_data(ctx: &HandlerContext, payload: Value) -> Result<usize, HandlerError> {
    let data = parse_data(payload)?;
    let keys = data.len();
    ctx.session()
        .set_data(data)
        .map_err(|e| set_data_error(e.to_string()))?;
    Ok(keys)
}

/// `connector.gethandshakedata`: the handshake the client sent.
pub struct GetHandshakeData;

#[async_trait]
impl Handler for GetHandshakeData {
    async fn handle(&self, ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
        match ctx.session().handshake() {
            Some(handshake) => to_value(handshake),
            None => Ok(Value::Null),
        }
    }
}

/// `connector.getsessiondata`: the session's data bag as `{Data}`.
pub struct GetSessionData;

#[async_trait]
impl Handler for GetSessionData {
    async fn handle(&self, ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
        let data = ctx.session().data()?;
        to_value(SessionDataReply {
            data: bag_to_json(&data),
        })
    }
}

/// `connector.setsessiondata`: merge the payload into the data bag.
pub struct SetSessionData;

#[async_trait]
impl Handler for SetSessionData {
    async fn handle(&self, ctx: &HandlerContext, payload: Value) -> Result<Value, HandlerError> {
        let keys = apply_data(ctx, payload)?;
        debug!(session_id = %ctx.session_id(), keys, "session data updated");
        to_value(Reply::ok("success"))
    }
}

/// `connector.notifysessiondata`: like `setsessiondata`, no reply body.
pub struct NotifySessionData;

#[async_trait]
impl Handler for NotifySessionData {
    async fn handle(&self, ctx: &HandlerContext, payload: Value) -> Result<Value, HandlerError> {
        if let Err(err) = apply_data(ctx, payload) {
            warn!(session_id = %ctx.session_id(), error = %err, "notify failed to set session data");
            return Err(err);
        }
        Ok(Value::Null)
    }
}

/// `connector.sendpush`: push a fixed message to the caller.
pub struct SendPush;

#[async_trait]
impl Handler for SendPush {
    async fn handle(&self, ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
        ctx.push(PUSH_ROUTE, json!({"key1": 10, "key2": true}))?;
        to_value(Reply::ok("Ok"))
    }
}

/// `connector.geterror`: always fails.
pub struct GetError;

#[async_trait]
impl Handler for GetError {
    async fn handle(&self, _ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
        Err(HandlerError::unknown("GetError is returning a custom error"))
    }
}

/// `connector.tracedcall`: two simulated downstream calls, each in its own
/// `downstream` span under the dispatch span.
#[derive(Clone, Debug)]
pub struct TracedCall {
    delay: Duration,
}

impl TracedCall {
    /// Each simulated call sleeps for `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for TracedCall {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl Handler for TracedCall {
    async fn handle(&self, ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
        let trace_id = ctx.trace().map(|t| t.trace_id.clone()).unwrap_or_default();
        let mut calls = Vec::new();
        for target in ["storage", "matchmaking"] {
            let span = info_span!("downstream", peer = target, trace_id = %trace_id);
            tokio::time::sleep(self.delay).instrument(span).await;
            calls.push(target);
        }
        Ok(json!({"Code": 200, "Calls": calls, "TraceId": trace_id}))
    }
}
