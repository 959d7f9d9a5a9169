//! # relay-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.relay/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `RELAY_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, relay_home, settings_path};
pub use types::*;
