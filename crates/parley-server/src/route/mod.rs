//! Route names, the frozen route table and server selection.
//!
//! A route is `service.method` for handlers served by this process, or
//! `server_type.service.method` when the caller names the server type that
//! owns it. Names are case-insensitive and stored lowercase.

pub mod dictionary;
pub mod selector;
pub mod table;

use std::fmt;

use thiserror::Error;

pub use dictionary::RouteDictionary;
pub use selector::{FirstAvailable, ServerInfo, ServerSelector};
pub use table::{Component, Handler, RouteTable, RouteTableBuilder};

/// Errors raised while building or querying routes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// Name is not `[server_type.]service.method`.
    #[error("invalid route '{name}': {reason}")]
    Invalid {
        /// Offending name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// Name already registered.
    #[error("route '{0}' is already registered")]
    Duplicate(String),
    /// No handler for this name.
    #[error("route '{0}' not found")]
    NotFound(String),
    /// Two dictionary entries share a code.
    #[error("route code {code} is used by both '{first}' and '{second}'")]
    DuplicateCode {
        /// Shared code.
        code: u16,
        /// First route using it.
        first: String,
        /// Second route using it.
        second: String,
    },
}

/// A parsed route name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    server_type: Option<String>,
    service: String,
    method: String,
}

impl Route {
    /// Parse and normalize a route name.
    pub fn parse(name: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::Invalid {
            name: name.to_owned(),
            reason,
        };
        let lower = name.trim().to_ascii_lowercase();
        let parts: Vec<&str> = lower.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty segment"));
        }
        if !parts.iter().all(|p| p.chars().all(is_route_char)) {
            return Err(invalid("segments may only contain letters, digits, '_' and '-'"));
        }
        match parts.as_slice() {
            [service, method] => Ok(Self {
                server_type: None,
                service: (*service).to_owned(),
                method: (*method).to_owned(),
            }),
            [server_type, service, method] => Ok(Self {
                server_type: Some((*server_type).to_owned()),
                service: (*service).to_owned(),
                method: (*method).to_owned(),
            }),
            _ => Err(invalid("expected service.method or server_type.service.method")),
        }
    }

    /// Owning server type, if the name carries one.
    pub fn server_type(&self) -> Option<&str> {
        self.server_type.as_deref()
    }

    /// Service (component) name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// `service.method`, the key handlers are registered under.
    pub fn short(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }

    /// Whether this route is owned by a server type other than `local`.
    pub fn is_remote_for(&self, local: &str) -> bool {
        self.server_type
            .as_deref()
            .is_some_and(|st| !st.eq_ignore_ascii_case(local))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(st) = &self.server_type {
            write!(f, "{st}.")?;
        }
        write!(f, "{}.{}", self.service, self.method)
    }
}

fn is_route_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
