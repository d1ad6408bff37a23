//! Settings loading.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If a JSON config file is given, merge its values over the defaults
//! 3. Merge `PARLEY_*` environment variables (highest priority)
//! 4. Validate ranges
//!
//! A config path that does not exist is treated as empty, so a fresh
//! install runs on defaults.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::Result;
use crate::types::ParleySettings;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "PARLEY_";

fn base_figment() -> Figment {
    Figment::from(Serialized::defaults(ParleySettings::default()))
}

fn finish(figment: Figment) -> Result<ParleySettings> {
    let settings: ParleySettings = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from defaults and environment only.
pub fn load_settings() -> Result<ParleySettings> {
    finish(base_figment())
}

/// Load settings from a JSON file with env var overrides.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }
    finish(base_figment().merge(Json::file(path)))
}
