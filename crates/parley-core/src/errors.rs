//! Error taxonomy shared by the dispatcher and its handlers.
//!
//! Every failure that reaches the dispatch boundary is converted into an
//! [`ErrorBody`] tagged with an [`ErrorKind`] and a stable string code.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Error code constants ────────────────────────────────────────────

/// Handler failed without supplying its own code.
pub const UNKNOWN: &str = "PIT-000";
/// Malformed request or data-bag update.
pub const BAD_REQUEST: &str = "PIT-400";
/// Route or session does not exist.
pub const NOT_FOUND: &str = "PIT-404";
/// Dispatch was cancelled because the session closed.
pub const CANCELLED: &str = "PIT-499";
/// Handler panicked.
pub const INTERNAL: &str = "PIT-500";
/// Handler exceeded the dispatch timeout.
pub const TIMED_OUT: &str = "PIT-504";

/// Category of a dispatch failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Route string resolves to nothing.
    RouteNotFound,
    /// Target session is absent, closing or closed.
    SessionNotFound,
    /// Malformed request or data-bag update.
    ValidationError,
    /// Failure surfaced by handler logic.
    HandlerError,
}

impl ErrorKind {
    /// Stable name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RouteNotFound => "RouteNotFound",
            Self::SessionNotFound => "SessionNotFound",
            Self::ValidationError => "ValidationError",
            Self::HandlerError => "HandlerError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried by an error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Failure category.
    pub kind: ErrorKind,
    /// Machine-readable code (e.g. `PIT-404`, `CN-000`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional string metadata supplied by the handler.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ErrorBody {
    /// Build an error body without metadata.
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Error returned by handler logic.
///
/// The message is delivered to the client verbatim.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Caller-supplied stable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Extra string metadata.
    pub metadata: BTreeMap<String, String>,
    /// Overrides the reported kind; handlers leave this `None`.
    pub kind: Option<ErrorKind>,
}

impl HandlerError {
    /// Error with an explicit code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            metadata: BTreeMap::new(),
            kind: None,
        }
    }

    /// Error without a domain code (`PIT-000`).
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(UNKNOWN, message)
    }

    /// Wrap another error, keeping its message and assigning `code`.
    pub fn wrap(err: &dyn std::error::Error, code: impl Into<String>) -> Self {
        Self::new(code, err.to_string())
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.metadata.insert(key.into(), value.into());
        self
    }

    /// Report under a different kind (used when session errors bubble out of handlers).
    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind.unwrap_or(ErrorKind::HandlerError),
            code: self.code.clone(),
            message: self.message.clone(),
            metadata: self.metadata.clone(),
        }
    }
}
