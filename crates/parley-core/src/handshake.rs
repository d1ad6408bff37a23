//! Handshake metadata captured when a client connects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::SessionValue;

/// Client library information sent in the handshake `sys` block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeClientData {
    /// Client platform (e.g. `ios`, `android`, `mac`).
    #[serde(default)]
    pub platform: String,
    /// Version of the client networking library.
    #[serde(default)]
    pub lib_version: String,
    /// Application build number.
    #[serde(default, rename = "clientBuildNumber")]
    pub build_number: String,
    /// Application version string.
    #[serde(default, rename = "clientVersion")]
    pub version: String,
}

/// Everything the client told us at connect time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeData {
    /// Library/platform block.
    #[serde(default)]
    pub sys: HandshakeClientData,
    /// Free-form user block (auth tokens, locale, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user: BTreeMap<String, SessionValue>,
}
