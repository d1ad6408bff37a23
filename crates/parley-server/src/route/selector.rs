//! Server selection for routes owned by another server type.

use std::collections::BTreeMap;

use parley_core::ServerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Route;

/// A server instance known to service discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Unique server id.
    pub id: ServerId,
    /// Role name (`connector`, `room`, ...).
    pub server_type: String,
    /// Whether the server accepts client connections.
    #[serde(default)]
    pub frontend: bool,
    /// Free-form labels (region, version, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ServerInfo {
    /// Backend server of the given type.
    pub fn new(id: impl Into<ServerId>, server_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            server_type: server_type.into(),
            frontend: false,
            metadata: BTreeMap::new(),
        }
    }
}

/// Picks one server among the candidates for a route.
///
/// Closures with the same signature implement this trait.
pub trait ServerSelector: Send + Sync {
    /// Chosen server, or `None` to reject the call.
    fn select(&self, route: &Route, payload: &Value, candidates: &[ServerInfo])
    -> Option<ServerInfo>;
}

impl<F> ServerSelector for F
where
    F: Fn(&Route, &Value, &[ServerInfo]) -> Option<ServerInfo> + Send + Sync,
{
    fn select(
        &self,
        route: &Route,
        payload: &Value,
        candidates: &[ServerInfo],
    ) -> Option<ServerInfo> {
        self(route, payload, candidates)
    }
}

/// Default policy: the candidate with the lowest server id.
///
/// Not weighted or load-aware; the same candidate set always yields the
/// same choice.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstAvailable;

impl ServerSelector for FirstAvailable {
    fn select(
        &self,
        _route: &Route,
        _payload: &Value,
        candidates: &[ServerInfo],
    ) -> Option<ServerInfo> {
        candidates.iter().min_by(|a, b| a.id.cmp(&b.id)).cloned()
    }
}
