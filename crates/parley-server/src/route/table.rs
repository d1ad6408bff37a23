//! Route table: route name to handler, plus per-server-type selectors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::HandlerError;
use serde_json::Value;

use super::selector::{FirstAvailable, ServerInfo, ServerSelector};
use super::{Route, RouteError};
use crate::dispatch::HandlerContext;

/// Trait implemented by every route handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the handler against the calling session.
    async fn handle(&self, ctx: &HandlerContext, payload: Value) -> Result<Value, HandlerError>;
}

/// A named group of handlers registered as `component.method`.
pub trait Component: Send + Sync {
    /// `(method, handler)` pairs exposed by this component.
    fn methods(&self) -> Vec<(&'static str, Arc<dyn Handler>)>;
}

/// Mutable route table used during startup.
#[derive(Default)]
pub struct RouteTableBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
    selectors: HashMap<String, Arc<dyn ServerSelector>>,
}

impl RouteTableBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `service.method`.
    pub fn register(
        &mut self,
        name: &str,
        handler: impl Handler + 'static,
    ) -> Result<(), RouteError> {
        self.insert(name, Arc::new(handler))
    }

    /// Register every method of `component` under `name.method`.
    pub fn register_component(
        &mut self,
        name: &str,
        component: &dyn Component,
    ) -> Result<(), RouteError> {
        for (method, handler) in component.methods() {
            self.insert(&format!("{name}.{method}"), handler)?;
        }
        Ok(())
    }

    /// Install the server selector for one server type.
    pub fn add_selector(
        &mut self,
        server_type: &str,
        selector: impl ServerSelector + 'static,
    ) {
        let _ = self
            .selectors
            .insert(server_type.to_ascii_lowercase(), Arc::new(selector));
    }

    /// Freeze the table.
    pub fn build(self) -> RouteTable {
        RouteTable {
            handlers: self.handlers,
            selectors: self.selectors,
        }
    }

    fn insert(&mut self, name: &str, handler: Arc<dyn Handler>) -> Result<(), RouteError> {
        let route = Route::parse(name)?;
        if route.server_type().is_some() {
            return Err(RouteError::Invalid {
                name: name.to_owned(),
                reason: "handlers are registered as service.method",
            });
        }
        let key = route.short();
        if self.handlers.contains_key(&key) {
            return Err(RouteError::Duplicate(key));
        }
        let _ = self.handlers.insert(key, handler);
        Ok(())
    }
}

/// Frozen route table. Nothing can be registered once built.
pub struct RouteTable {
    handlers: HashMap<String, Arc<dyn Handler>>,
    selectors: HashMap<String, Arc<dyn ServerSelector>>,
}

impl RouteTable {
    /// Start building a table.
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::new()
    }

    /// Handler for a route name. Malformed names are simply not found.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Handler>, RouteError> {
        Route::parse(name)
            .ok()
            .and_then(|route| self.handlers.get(&route.short()).cloned())
            .ok_or_else(|| RouteError::NotFound(name.to_owned()))
    }

    /// Handler for an already-parsed route; the server type is ignored.
    pub fn resolve_route(&self, route: &Route) -> Result<Arc<dyn Handler>, RouteError> {
        self.handlers
            .get(&route.short())
            .cloned()
            .ok_or_else(|| RouteError::NotFound(route.to_string()))
    }

    /// Pick the server that should serve `route`.
    ///
    /// Uses the selector installed for the route's server type, falling back
    /// to [`FirstAvailable`].
    pub fn select_server(
        &self,
        route: &Route,
        payload: &Value,
        candidates: &[ServerInfo],
    ) -> Option<ServerInfo> {
        if candidates.is_empty() {
            return None;
        }
        match route.server_type().and_then(|st| self.selectors.get(st)) {
            Some(selector) => selector.select(route, payload, candidates),
            None => FirstAvailable.select(route, payload, candidates),
        }
    }

    /// Registered route names, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a route name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes())
            .finish_non_exhaustive()
    }
}
