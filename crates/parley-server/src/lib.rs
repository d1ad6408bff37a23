//! # parley-server
//!
//! Session-scoped request/response dispatch for a persistent-connection
//! game server.
//!
//! - [`session`]: session state and the registry that owns it
//! - [`route`]: route names, the frozen route table, server selection and
//!   the route dictionary
//! - [`dispatch`]: the dispatcher and the cluster forwarding seam
//! - [`push`]: server-initiated delivery to a session's connection
//! - [`handlers`]: the `connector.*` handlers
//! - [`gateway`] and [`server`]: WebSocket JSON frames, `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod dispatch;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod push;
pub mod route;
pub mod server;
pub mod session;
pub mod shutdown;

pub use dispatch::{DispatchConfig, DispatchError, Dispatcher, HandlerContext};
pub use push::{PushChannel, PushError};
pub use route::{Handler, Route, RouteDictionary, RouteError, RouteTable, RouteTableBuilder};
pub use server::ParleyServer;
pub use session::{Session, SessionError, SessionLimits, SessionRegistry, SessionState};
