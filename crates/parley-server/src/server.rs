//! `ParleyServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use parley_settings::{ParleySettings, ServerSettings};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::gateway::{Gateway, run_ws_session};
use crate::health::{self, HealthCounters, HealthResponse};
use crate::metrics;
use crate::push::PushChannel;
use crate::route::{RouteDictionary, RouteTable};
use crate::session::{SessionLimits, SessionRegistry};
use crate::shutdown::{DrainReport, ShutdownCoordinator};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// WebSocket gateway.
    pub gateway: Arc<Gateway>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Server settings.
    pub settings: Arc<ServerSettings>,
}

/// The parley server.
pub struct ParleyServer {
    settings: Arc<ServerSettings>,
    gateway: Arc<Gateway>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl ParleyServer {
    /// Create a server in front of an already-configured dispatcher.
    pub fn new(
        settings: ServerSettings,
        dispatcher: Arc<Dispatcher>,
        dictionary: RouteDictionary,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new(dispatcher.sessions().clone()));
        let gateway = Arc::new(Gateway::new(
            dispatcher,
            dictionary,
            Duration::from_secs(settings.heartbeat_interval_secs),
            shutdown.token(),
        ));
        Self {
            settings: Arc::new(settings),
            gateway,
            shutdown,
            metrics: None,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Wire registry, push channel and dispatcher from settings.
    pub fn from_settings(
        settings: &ParleySettings,
        routes: RouteTable,
        dictionary: RouteDictionary,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(SessionLimits::from(&settings.sessions)));
        let push = PushChannel::new(sessions.clone());
        let dispatcher = Dispatcher::new(
            Arc::new(routes),
            sessions,
            push,
            DispatchConfig::from_settings(settings),
        );
        Self::new(settings.server.clone(), Arc::new(dispatcher), dictionary)
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: self.gateway.clone(),
            shutdown: self.shutdown.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            started_at: self.started_at,
            settings: self.settings.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(
            addr = %local_addr,
            server_type = %self.settings.server_type,
            routes = self.gateway.dispatcher().routes().len(),
            "parley server listening"
        );

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(err) = served {
                warn!(error = %err, "server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop accepting, close every session and wait for `handles`.
    pub async fn shutdown_gracefully(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> DrainReport {
        self.shutdown.drain(handles, timeout).await
    }

    /// The WebSocket gateway.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// The dispatcher behind the gateway.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.gateway.dispatcher()
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let dispatcher = state.gateway.dispatcher();
    let counters = HealthCounters {
        connections: state.gateway.connections(),
        sessions: dispatcher.sessions().len(),
        active_sessions: dispatcher.sessions().active_count(),
        routes: dispatcher.routes().len(),
    };
    Json(health::health_check(
        state.start_time,
        state.started_at,
        &state.settings.server_type,
        state.shutdown.is_draining(),
        counters,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    if state.gateway.connections() >= state.settings.max_connections {
        warn!(
            max_connections = state.settings.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }
    let gateway = state.gateway.clone();
    ws.max_message_size(state.settings.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, gateway))
        .into_response()
}
