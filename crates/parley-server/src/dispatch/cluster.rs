//! Forwarding seam for routes owned by another server type.
//!
//! Discovery and the remote transport are external collaborators; the
//! dispatcher only sees these two traits.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{DataBag, HandlerError, SessionId, TraceContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::route::ServerInfo;

/// Lists servers by type.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceDiscovery: Send + Sync {
    /// Every known server of `server_type`.
    fn servers_by_type(&self, server_type: &str) -> Vec<ServerInfo>;
}

/// Sends a forwarded call to a chosen server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteCaller: Send + Sync {
    /// Execute `request` on `server` and return its reply body.
    async fn call(&self, server: &ServerInfo, request: RemoteRequest) -> Result<Value, HandlerError>;
}

/// A call forwarded to another server, carrying a snapshot of the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// Full route name, including server type.
    pub route: String,
    /// Request body.
    pub payload: Value,
    /// Originating session.
    pub session_id: SessionId,
    /// Session data at the time of the call.
    pub data: DataBag,
    /// Trace context, if the client sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,
}

/// Discovery backed by a fixed server list.
#[derive(Clone, Debug, Default)]
pub struct StaticDiscovery {
    servers: BTreeMap<String, Vec<ServerInfo>>,
}

impl StaticDiscovery {
    /// Group `servers` by type.
    pub fn new(servers: impl IntoIterator<Item = ServerInfo>) -> Self {
        let mut grouped: BTreeMap<String, Vec<ServerInfo>> = BTreeMap::new();
        for server in servers {
            grouped
                .entry(server.server_type.to_ascii_lowercase())
                .or_default()
                .push(server);
        }
        Self { servers: grouped }
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn servers_by_type(&self, server_type: &str) -> Vec<ServerInfo> {
        self.servers
            .get(&server_type.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

/// Discovery plus transport for forwarded routes.
#[derive(Clone)]
pub struct Cluster {
    /// Where candidate servers come from.
    pub discovery: Arc<dyn ServiceDiscovery>,
    /// How forwarded calls are sent.
    pub caller: Arc<dyn RemoteCaller>,
}

impl Cluster {
    /// Bundle a discovery source and a caller.
    pub fn new(discovery: Arc<dyn ServiceDiscovery>, caller: Arc<dyn RemoteCaller>) -> Self {
        Self { discovery, caller }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster").finish_non_exhaustive()
    }
}
