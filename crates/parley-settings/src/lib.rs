//! # parley-settings
//!
//! Layered configuration for parley runs.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **User file**: `~/.parley/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `PARLEY_*` overrides (highest priority)
//!
//! Command-line flags are applied by the binary on top of the result. The
//! core crates never read settings directly: they receive the
//! [`ClientConfig`](parley_core::ClientConfig) and
//! [`RunConfig`](parley_core::RunConfig) values built here.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
