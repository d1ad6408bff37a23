//! # parley-core
//!
//! Foundation types shared by every parley crate:
//!
//! - **Branded IDs**: [`SessionId`], [`ServerId`] as newtypes for type safety
//! - **Session values**: [`SessionValue`] tagged variant and the [`DataBag`] it lives in
//! - **Handshake**: [`HandshakeData`] captured when a client connects
//! - **Errors**: [`ErrorKind`] taxonomy, [`HandlerError`] and the stable error codes
//! - **Protocol**: decoded [`Request`], [`Response`] and [`PushMessage`] envelopes
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod errors;
pub mod handshake;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod value;

pub use errors::{ErrorBody, ErrorKind, HandlerError};
pub use handshake::{HandshakeClientData, HandshakeData};
pub use ids::{ServerId, SessionId};
pub use protocol::{PushMessage, Request, Response, TraceContext};
pub use logging::LogFormat;
pub use value::{DataBag, SessionValue, ValueError, bag_from_json, bag_to_json};
