//! # parley-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **Config file**: JSON, merged per key over defaults
//! 3. **Environment variables**: `PARLEY_*` overrides (highest priority),
//!    nested with `__` (e.g. `PARLEY_SERVER__PORT=4000`)
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{ENV_PREFIX, load_settings, load_settings_from_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let settings = ParleySettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(ENV_PREFIX, "PARLEY_");
    }
}
