//! Request dispatch: route resolution, session context, handler execution.
//!
//! [`Dispatcher::handle`] never fails: every error is converted into a
//! failed [`Response`] carrying an [`ErrorKind`] and a stable code.

pub mod cluster;
pub mod context;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use parley_core::errors as codes;
use parley_core::{
    ErrorBody, ErrorKind, HandlerError, Request, Response, SessionId, TraceContext,
};
use parley_settings::ParleySettings;
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, debug, field, info_span, warn};

use crate::metrics::{DISPATCH_DURATION_SECONDS, DISPATCH_ERRORS_TOTAL, DISPATCH_REQUESTS_TOTAL};
use crate::push::PushChannel;
use crate::route::{Handler, Route, RouteTable};
use crate::session::{Session, SessionRegistry};

pub use cluster::{Cluster, RemoteCaller, RemoteRequest, ServiceDiscovery, StaticDiscovery};
pub use context::HandlerContext;

/// Why a dispatch failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler, no cluster, or no server to forward to.
    #[error("route '{0}' not found")]
    RouteNotFound(String),
    /// Calling session is unknown or not active.
    #[error("session '{0}' not found")]
    SessionNotFound(SessionId),
    /// Handler returned an error.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// Handler ran longer than the configured limit.
    #[error("handler for '{route}' timed out after {after:?}")]
    TimedOut {
        /// Route being served.
        route: String,
        /// Configured limit.
        after: Duration,
    },
    /// The session closed while the call was pending.
    #[error("call to '{route}' cancelled: session closed")]
    Cancelled {
        /// Route being served.
        route: String,
    },
    /// Handler panicked.
    #[error("handler for '{route}' panicked: {message}")]
    Panicked {
        /// Route being served.
        route: String,
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl DispatchError {
    /// Convert to the wire error body.
    pub fn to_error_body(&self) -> ErrorBody {
        match self {
            Self::RouteNotFound(_) => {
                ErrorBody::new(ErrorKind::RouteNotFound, codes::NOT_FOUND, self.to_string())
            }
            Self::SessionNotFound(_) => {
                ErrorBody::new(ErrorKind::SessionNotFound, codes::NOT_FOUND, self.to_string())
            }
            Self::Handler(err) => err.to_error_body(),
            Self::TimedOut { .. } => {
                ErrorBody::new(ErrorKind::HandlerError, codes::TIMED_OUT, self.to_string())
            }
            Self::Cancelled { .. } => {
                ErrorBody::new(ErrorKind::HandlerError, codes::CANCELLED, self.to_string())
            }
            Self::Panicked { .. } => {
                ErrorBody::new(ErrorKind::HandlerError, codes::INTERNAL, self.to_string())
            }
        }
    }
}

/// Dispatcher tuning.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Server type of this process; three-part routes naming another type
    /// are forwarded.
    pub server_type: String,
    /// Maximum time a single handler may run.
    pub handler_timeout: Duration,
    /// Dispatches slower than this are logged at `warn`.
    pub slow_dispatch: Duration,
}

impl DispatchConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            server_type: settings.server.server_type.to_ascii_lowercase(),
            handler_timeout: Duration::from_millis(settings.dispatch.handler_timeout_ms),
            slow_dispatch: Duration::from_millis(settings.dispatch.slow_dispatch_ms),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from_settings(&ParleySettings::default())
    }
}

/// Resolves routes and runs handlers against sessions.
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    sessions: Arc<SessionRegistry>,
    push: PushChannel,
    cluster: Option<Cluster>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher serving local routes only.
    pub fn new(
        routes: Arc<RouteTable>,
        sessions: Arc<SessionRegistry>,
        push: PushChannel,
        config: DispatchConfig,
    ) -> Self {
        Self {
            routes,
            sessions,
            push,
            cluster: None,
            config,
        }
    }

    /// Enable forwarding of routes owned by other server types.
    #[must_use]
    pub fn with_cluster(mut self, cluster: Cluster) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// The frozen route table.
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// The session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The push channel handed to handlers.
    pub fn push_channel(&self) -> &PushChannel {
        &self.push
    }

    /// Dispatcher settings.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatch one request and produce its response.
    pub async fn handle(&self, request: Request) -> Response {
        let Request {
            id,
            route,
            payload,
            session_id,
            trace,
        } = request;

        let parsed = Route::parse(&route).ok();
        let label = self.metric_label(parsed.as_ref());
        counter!(DISPATCH_REQUESTS_TOTAL, "route" => label.clone()).increment(1);

        let span = info_span!(
            "dispatch",
            route = %route,
            session_id = %session_id,
            request_id = ?id,
            trace_id = field::Empty,
        );
        if let Some(trace) = &trace {
            let _ = span.record("trace_id", trace.trace_id.as_str());
        }

        let start = Instant::now();
        let result = async {
            let Some(parsed) = parsed else {
                return Err(DispatchError::RouteNotFound(route.clone()));
            };
            let handler = if parsed.is_remote_for(&self.config.server_type) {
                None
            } else {
                let handler = self
                    .routes
                    .resolve_route(&parsed)
                    .map_err(|_| DispatchError::RouteNotFound(parsed.to_string()))?;
                Some(handler)
            };
            let session = self
                .sessions
                .get_active(&session_id)
                .map_err(|_| DispatchError::SessionNotFound(session_id.clone()))?;
            match handler {
                Some(handler) => self.run_local(handler, parsed, session, id, payload, trace).await,
                None => self.forward(&parsed, &session, payload, trace).await,
            }
        }
        .instrument(span.clone())
        .await;

        let duration = start.elapsed();
        histogram!(DISPATCH_DURATION_SECONDS, "route" => label.clone())
            .record(duration.as_secs_f64());
        if duration >= self.config.slow_dispatch {
            warn!(
                parent: &span,
                duration_secs = duration.as_secs_f64(),
                "slow dispatch"
            );
        }

        match result {
            Ok(body) => Response::success(id, route, body),
            Err(err) => {
                let body = err.to_error_body();
                counter!(DISPATCH_ERRORS_TOTAL, "route" => label, "kind" => body.kind.as_str())
                    .increment(1);
                debug!(parent: &span, kind = %body.kind, code = %body.code, error = %err, "dispatch failed");
                Response::failure(id, route, body)
            }
        }
    }

    async fn run_local(
        &self,
        handler: Arc<dyn Handler>,
        route: Route,
        session: Arc<Session>,
        request_id: Option<u64>,
        payload: Value,
        trace: Option<TraceContext>,
    ) -> Result<Value, DispatchError> {
        let name = route.to_string();
        let ctx = HandlerContext::new(
            session.clone(),
            self.push.clone(),
            route,
            request_id,
            trace,
        );
        self.execute(&name, &session, handler.handle(&ctx, payload))
            .await
    }

    async fn forward(
        &self,
        route: &Route,
        session: &Arc<Session>,
        payload: Value,
        trace: Option<TraceContext>,
    ) -> Result<Value, DispatchError> {
        let name = route.to_string();
        let Some(cluster) = &self.cluster else {
            return Err(DispatchError::RouteNotFound(name));
        };
        let server_type = route.server_type().unwrap_or_default();
        let candidates = cluster.discovery.servers_by_type(server_type);
        let Some(server) = self.routes.select_server(route, &payload, &candidates) else {
            return Err(DispatchError::RouteNotFound(name));
        };
        debug!(server_id = %server.id, server_type, "forwarding to remote server");

        let request = RemoteRequest {
            route: name.clone(),
            payload,
            session_id: session.id().clone(),
            data: session.data().map_err(|_| DispatchError::SessionNotFound(session.id().clone()))?,
            trace,
        };
        let caller = cluster.caller.clone();
        self.execute(&name, session, async move { caller.call(&server, request).await })
            .await
    }

    /// Run `call` under the session's dispatch lock, bounded by the handler
    /// timeout and the session close token. Panics become errors.
    async fn execute<F>(
        &self,
        route: &str,
        session: &Session,
        call: F,
    ) -> Result<Value, DispatchError>
    where
        F: Future<Output = Result<Value, HandlerError>>,
    {
        let closed = session.close_token();
        let cancelled = || DispatchError::Cancelled {
            route: route.to_owned(),
        };

        let _guard = tokio::select! {
            guard = session.lock_dispatch() => guard,
            () = closed.cancelled() => return Err(cancelled()),
        };
        if !session.is_active() {
            return Err(cancelled());
        }

        let guarded = AssertUnwindSafe(call).catch_unwind();
        tokio::select! {
            biased;
            () = closed.cancelled() => Err(cancelled()),
            outcome = tokio::time::timeout(self.config.handler_timeout, guarded) => match outcome {
                Err(_elapsed) => {
                    warn!(route, timeout = ?self.config.handler_timeout, "handler timed out");
                    Err(DispatchError::TimedOut {
                        route: route.to_owned(),
                        after: self.config.handler_timeout,
                    })
                }
                Ok(Err(panic)) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(route, panic = %message, "handler panicked");
                    Err(DispatchError::Panicked {
                        route: route.to_owned(),
                        message,
                    })
                }
                Ok(Ok(result)) => result.map_err(DispatchError::from),
            },
        }
    }

    /// Bounded route label: registered local routes by name, forwarded
    /// routes by server type, everything else `unknown`.
    fn metric_label(&self, route: Option<&Route>) -> String {
        match route {
            Some(r) if r.is_remote_for(&self.config.server_type) => {
                match (&self.cluster, r.server_type()) {
                    (Some(cluster), Some(st))
                        if !cluster.discovery.servers_by_type(st).is_empty() =>
                    {
                        format!("{st}.*")
                    }
                    _ => "unknown".to_owned(),
                }
            }
            Some(r) if self.routes.resolve_route(r).is_ok() => r.short(),
            _ => "unknown".to_owned(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{RouteTableBuilder, ServerInfo};
    use crate::session::SessionLimits;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use cluster::{MockRemoteCaller, MockServiceDiscovery};
    use parley_core::{PushMessage, SessionValue};
    use serde_json::json;
    use tokio::sync::mpsc;

    // ── Test handlers ───────────────────────────────────────────────

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, _ctx: &HandlerContext, payload: Value) -> Result<Value, HandlerError> {
            Ok(payload)
        }
    }

    struct Fail;

    #[async_trait]
    impl Handler for Fail {
        async fn handle(&self, _ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
            Err(HandlerError::unknown("GetError is returning a custom error"))
        }
    }

    struct Boom;

    #[async_trait]
    impl Handler for Boom {
        async fn handle(&self, _ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
            panic!("kaboom");
        }
    }

    struct Sleepy(Duration);

    #[async_trait]
    impl Handler for Sleepy {
        async fn handle(&self, _ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
            tokio::time::sleep(self.0).await;
            Ok(json!("done"))
        }
    }

    /// Reads `counter`, yields, then writes `counter + 1`.
    struct Increment;

    #[async_trait]
    impl Handler for Increment {
        async fn handle(&self, ctx: &HandlerContext, _payload: Value) -> Result<Value, HandlerError> {
            let current = match ctx.session().get("counter")? {
                Some(SessionValue::Int(n)) => n,
                _ => 0,
            };
            tokio::task::yield_now().await;
            ctx.session().set("counter", current + 1)?;
            Ok(json!(current + 1))
        }
    }

    struct PushSelf;

    #[async_trait]
    impl Handler for PushSelf {
        async fn handle(&self, ctx: &HandlerContext, payload: Value) -> Result<Value, HandlerError> {
            ctx.push("onMessage", payload)?;
            Ok(Value::Null)
        }
    }

    // ── Fixtures ────────────────────────────────────────────────────

    struct Fixture {
        dispatcher: Dispatcher,
        session: SessionId,
        rx: mpsc::Receiver<PushMessage>,
    }

    fn routes() -> RouteTableBuilder {
        let mut b = RouteTable::builder();
        b.register("test.echo", Echo).unwrap();
        b.register("test.fail", Fail).unwrap();
        b.register("test.boom", Boom).unwrap();
        b.register("test.slow", Sleepy(Duration::from_secs(120))).unwrap();
        b.register("test.increment", Increment).unwrap();
        b.register("test.push", PushSelf).unwrap();
        b
    }

    fn fixture_with(builder: RouteTableBuilder, config: DispatchConfig) -> Fixture {
        let sessions = Arc::new(SessionRegistry::new(SessionLimits::default()));
        let session = SessionId::from("s1");
        let _ = sessions.create(session.clone(), None).unwrap();
        let rx = sessions.activate(&session).unwrap();
        let push = PushChannel::new(sessions.clone());
        let dispatcher = Dispatcher::new(Arc::new(builder.build()), sessions, push, config);
        Fixture {
            dispatcher,
            session,
            rx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(routes(), DispatchConfig::default())
    }

    fn request(f: &Fixture, route: &str, payload: Value) -> Request {
        Request::new(f.session.clone(), route, payload).with_id(1)
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn success_wraps_handler_value() {
        let f = fixture();
        let resp = f.dispatcher.handle(request(&f, "test.echo", json!({"x": 1}))).await;
        assert!(resp.success);
        assert_eq!(resp.id, Some(1));
        assert_eq!(resp.route, "test.echo");
        assert_eq!(resp.body, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn unknown_route_is_route_not_found() {
        let f = fixture();
        let resp = f.dispatcher.handle(request(&f, "connector.unknown", json!({}))).await;
        assert!(!resp.success);
        assert_eq!(resp.error_kind(), Some(ErrorKind::RouteNotFound));
        assert_eq!(resp.error.unwrap().code, codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_route_is_route_not_found() {
        let f = fixture();
        let resp = f.dispatcher.handle(request(&f, "no-dots", json!({}))).await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::RouteNotFound));
    }

    #[tokio::test]
    async fn handler_error_message_preserved() {
        let f = fixture();
        let resp = f.dispatcher.handle(request(&f, "test.fail", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.kind, ErrorKind::HandlerError);
        assert_eq!(err.code, codes::UNKNOWN);
        assert_eq!(err.message, "GetError is returning a custom error");
    }

    #[tokio::test]
    async fn panic_becomes_internal_error() {
        let f = fixture();
        let resp = f.dispatcher.handle(request(&f, "test.boom", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.kind, ErrorKind::HandlerError);
        assert_eq!(err.code, codes::INTERNAL);
        assert!(err.message.contains("kaboom"));

        // The dispatcher and the session lock survive the panic.
        let resp = f.dispatcher.handle(request(&f, "test.echo", json!(2))).await;
        assert!(resp.success);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let config = DispatchConfig {
            handler_timeout: Duration::from_secs(1),
            ..DispatchConfig::default()
        };
        let f = fixture_with(routes(), config);
        let resp = f.dispatcher.handle(request(&f, "test.slow", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, codes::TIMED_OUT);
        assert_eq!(err.kind, ErrorKind::HandlerError);
    }

    #[tokio::test]
    async fn unknown_session_is_session_not_found() {
        let f = fixture();
        let req = Request::new(SessionId::from("ghost"), "test.echo", json!({}));
        let resp = f.dispatcher.handle(req).await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::SessionNotFound));
    }

    #[tokio::test]
    async fn unknown_route_reported_before_unknown_session() {
        let f = fixture();
        let req = Request::new(SessionId::from("ghost"), "test.nothere", json!({}));
        let resp = f.dispatcher.handle(req).await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::RouteNotFound));
    }

    #[tokio::test]
    async fn connecting_session_is_session_not_found() {
        let f = fixture();
        let pending = SessionId::from("pending");
        let _ = f.dispatcher.sessions().create(pending.clone(), None).unwrap();
        let resp = f
            .dispatcher
            .handle(Request::new(pending, "test.echo", json!({})))
            .await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::SessionNotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_session_cancels_in_flight_call() {
        let f = fixture();
        let dispatcher = Arc::new(f.dispatcher);
        let d = dispatcher.clone();
        let req = Request::new(f.session.clone(), "test.slow", json!({})).with_id(7);
        let call = tokio::spawn(async move { d.handle(req).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = dispatcher.sessions().remove(&f.session);

        let resp = call.await.unwrap();
        assert_eq!(resp.error.unwrap().code, codes::CANCELLED);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_session_dispatches_are_serialized() {
        let f = fixture();
        let dispatcher = Arc::new(f.dispatcher);
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let d = dispatcher.clone();
            let req = Request::new(f.session.clone(), "test.increment", json!({}));
            tasks.push(tokio::spawn(async move { d.handle(req).await }));
        }
        for t in tasks {
            assert!(t.await.unwrap().success);
        }
        let data = dispatcher.sessions().get_data(&f.session).unwrap();
        assert_eq!(data["counter"], SessionValue::Int(20));
    }

    #[tokio::test]
    async fn handler_push_reaches_own_session() {
        let mut f = fixture();
        let resp = f.dispatcher.handle(request(&f, "test.push", json!({"hi": 1}))).await;
        assert!(resp.success);
        let msg = f.rx.recv().await.unwrap();
        assert_eq!(msg.route, "onMessage");
        assert_eq!(msg.body, json!({"hi": 1}));
    }

    #[tokio::test]
    async fn notify_keeps_no_id() {
        let f = fixture();
        let req = Request::new(f.session.clone(), "test.echo", json!(1));
        assert!(req.is_notify());
        let resp = f.dispatcher.handle(req).await;
        assert!(resp.success);
        assert_eq!(resp.id, None);
    }

    // ── Forwarding ──────────────────────────────────────────────────

    #[tokio::test]
    async fn foreign_route_without_cluster_is_not_found() {
        let f = fixture();
        let resp = f
            .dispatcher
            .handle(request(&f, "room.room.getsessiondata", json!({})))
            .await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::RouteNotFound));
    }

    #[tokio::test]
    async fn local_three_part_route_runs_locally() {
        let f = fixture();
        let resp = f.dispatcher.handle(request(&f, "connector.test.echo", json!(5))).await;
        assert_eq!(resp.body, Some(json!(5)));
    }

    #[tokio::test]
    async fn foreign_route_forwarded_to_selected_server() {
        let f = fixture();
        f.dispatcher
            .sessions()
            .set_data(&f.session, [("key1".to_owned(), SessionValue::Int(10))].into())
            .unwrap();

        let mut discovery = MockServiceDiscovery::new();
        let _ = discovery
            .expect_servers_by_type()
            .withf(|st| st == "room")
            .returning(|_| vec![ServerInfo::new("room-2", "room"), ServerInfo::new("room-1", "room")]);

        let mut caller = MockRemoteCaller::new();
        let _ = caller
            .expect_call()
            .withf(|server, req| {
                server.id.as_str() == "room-1"
                    && req.route == "room.room.getsessiondata"
                    && req.data.get("key1") == Some(&SessionValue::Int(10))
            })
            .times(1)
            .returning(|_, req| Ok(json!({"Data": parley_core::bag_to_json(&req.data)})));

        let dispatcher = f
            .dispatcher
            .with_cluster(Cluster::new(Arc::new(discovery), Arc::new(caller)));
        let req = Request::new(f.session.clone(), "room.room.getsessiondata", json!({})).with_id(3);
        let resp = dispatcher.handle(req).await;
        assert!(resp.success, "{resp:?}");
        assert_eq!(resp.body.unwrap()["Data"]["key1"], 10);
    }

    #[tokio::test]
    async fn foreign_route_with_no_candidates_is_not_found() {
        let f = fixture();
        let mut discovery = MockServiceDiscovery::new();
        let _ = discovery.expect_servers_by_type().returning(|_| Vec::new());
        let mut caller = MockRemoteCaller::new();
        let _ = caller.expect_call().never();

        let dispatcher = f
            .dispatcher
            .with_cluster(Cluster::new(Arc::new(discovery), Arc::new(caller)));
        let resp = dispatcher
            .handle(Request::new(f.session.clone(), "room.room.join", json!({})))
            .await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::RouteNotFound));
    }

    #[tokio::test]
    async fn remote_error_passes_through() {
        let f = fixture();
        let mut discovery = MockServiceDiscovery::new();
        let _ = discovery
            .expect_servers_by_type()
            .returning(|_| vec![ServerInfo::new("room-1", "room")]);
        let mut caller = MockRemoteCaller::new();
        let _ = caller
            .expect_call()
            .returning(|_, _| Err(HandlerError::new("RM-001", "room full")));

        let dispatcher = f
            .dispatcher
            .with_cluster(Cluster::new(Arc::new(discovery), Arc::new(caller)));
        let resp = dispatcher
            .handle(Request::new(f.session.clone(), "room.room.join", json!({})))
            .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, "RM-001");
        assert_eq!(err.message, "room full");
    }

    // ── Metric labels ───────────────────────────────────────────────

    fn label(dispatcher: &Dispatcher, route: &str) -> String {
        dispatcher.metric_label(Route::parse(route).ok().as_ref())
    }

    #[test]
    fn unroutable_names_share_one_label() {
        let f = fixture();
        assert_eq!(label(&f.dispatcher, "test.echo"), "test.echo");
        assert_eq!(label(&f.dispatcher, "connector.test.echo"), "test.echo");
        assert_eq!(label(&f.dispatcher, "test.nothere"), "unknown");
        assert_eq!(label(&f.dispatcher, "x1.a.b"), "unknown");
        assert_eq!(label(&f.dispatcher, "x2.c.d"), "unknown");
        assert_eq!(label(&f.dispatcher, "nodot"), "unknown");
    }

    #[test]
    fn forwarded_routes_labelled_by_server_type() {
        let f = fixture();
        let mut discovery = MockServiceDiscovery::new();
        let _ = discovery.expect_servers_by_type().returning(|st| {
            if st == "room" {
                vec![ServerInfo::new("room-1", "room")]
            } else {
                Vec::new()
            }
        });
        let dispatcher = f
            .dispatcher
            .with_cluster(Cluster::new(Arc::new(discovery), Arc::new(MockRemoteCaller::new())));
        assert_eq!(label(&dispatcher, "room.room.join"), "room.*");
        assert_eq!(label(&dispatcher, "room.chat.send"), "room.*");
        assert_eq!(label(&dispatcher, "ghost.room.join"), "unknown");
    }

    #[tokio::test]
    async fn random_foreign_routes_record_a_single_series() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let f = fixture();
        for i in 0..25 {
            let route = format!("x{i}.a{i}.b{i}");
            let resp = f.dispatcher.handle(request(&f, &route, json!({}))).await;
            assert_eq!(resp.error_kind(), Some(ErrorKind::RouteNotFound));
        }

        let output = handle.render();
        let series: Vec<&str> = output
            .lines()
            .filter(|line| line.starts_with(DISPATCH_REQUESTS_TOTAL))
            .collect();
        assert_eq!(series, vec![r#"parley_dispatch_requests_total{route="unknown"} 25"#]);
    }

    #[test]
    fn dispatch_error_codes() {
        let err = DispatchError::Cancelled { route: "a.b".into() };
        assert_eq!(err.to_error_body().code, codes::CANCELLED);
        let err = DispatchError::SessionNotFound(SessionId::from("x"));
        assert_matches!(err.to_error_body().kind, ErrorKind::SessionNotFound);
    }
}
