//! # scribe-settings
//!
//! Configuration for the scribe fine-tuning data pipeline.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`PrepSettings::default()`]
//! 2. **Settings file**: a flat JSON object (deep-merged over defaults)
//! 3. **Environment variables**: `SCRIBE_*` overrides (highest priority)
//!
//! The resolved [`PrepSettings`] is an explicit value handed to each stage;
//! there is no process-wide cache.
//!
//! ## Crate Position
//!
//! Standalone (no scribe crate dependencies).
//! Depended on by: scribe-prep, scribe.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, parse_settings,
    settings_path,
};
pub use types::*;
