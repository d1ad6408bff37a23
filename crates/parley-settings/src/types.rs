//! Settings structures.
//!
//! Field names are snake_case so they line up with the lowercased keys
//! produced by the `PARLEY_*` environment provider.

use std::collections::BTreeMap;

use parley_core::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleySettings {
    /// Network listener and server identity.
    pub server: ServerSettings,
    /// Dispatcher limits.
    pub dispatch: DispatchSettings,
    /// Session registry limits.
    pub sessions: SessionSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Route dictionary (route name to compact numeric code).
    pub dictionary: BTreeMap<String, u16>,
}

impl ParleySettings {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        fn at_least_one(name: &str, value: u64) -> Result<()> {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "{name} must be at least 1"
                )));
            }
            Ok(())
        }

        if self.server.server_type.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "server.server_type must not be empty".into(),
            ));
        }
        at_least_one("server.max_connections", self.server.max_connections as u64)?;
        at_least_one("server.heartbeat_interval_secs", self.server.heartbeat_interval_secs)?;
        at_least_one("server.max_message_size", self.server.max_message_size as u64)?;
        at_least_one("dispatch.handler_timeout_ms", self.dispatch.handler_timeout_ms)?;
        at_least_one("sessions.push_buffer", self.sessions.push_buffer as u64)?;
        at_least_one("sessions.max_data_keys", self.sessions.max_data_keys as u64)?;
        at_least_one("sessions.max_key_length", self.sessions.max_key_length as u64)?;
        at_least_one("sessions.max_value_depth", self.sessions.max_value_depth as u64)?;
        Ok(())
    }
}

/// Listener and server identity settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` = auto-assign).
    pub port: u16,
    /// Role of this process (routes owned by other types are forwarded).
    pub server_type: String,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// Heartbeat interval advertised in the handshake, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Max inbound frame size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3250,
            server_type: "connector".to_string(),
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Dispatcher settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Maximum time a single handler may run, in milliseconds.
    pub handler_timeout_ms: u64,
    /// Dispatches slower than this are logged at `warn`, in milliseconds.
    pub slow_dispatch_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 60_000,
            slow_dispatch_ms: 5_000,
        }
    }
}

/// Session registry settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Capacity of each session's outbound push queue.
    pub push_buffer: usize,
    /// Maximum number of keys in one data bag.
    pub max_data_keys: usize,
    /// Maximum byte length of a data-bag key.
    pub max_key_length: usize,
    /// Maximum nesting depth of a data-bag value.
    pub max_value_depth: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            push_buffer: 1024,
            max_data_keys: 256,
            max_key_length: 128,
            max_value_depth: 16,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
