//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{RelaySettings, StoreBackend};

/// `~/.relay`, or `/tmp/.relay` when `HOME` is unset.
pub fn relay_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay")
}

/// `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    relay_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed
/// [`RelaySettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RELAY_*` environment overrides.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_from(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are ignored with a
/// warning, keeping the file/default value.
pub fn apply_overrides_from(settings: &mut RelaySettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("RELAY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("RELAY_TURN_DEADLINE_SECS", 1, 24 * 3600) {
        settings.server.turn_deadline_secs = Some(v);
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.parsed("RELAY_STORE_BACKEND", parse_backend) {
        settings.store.backend = v;
    }
    if let Some(v) = env.string("RELAY_SQLITE_PATH") {
        settings.store.sqlite_path = v;
    }
    if let Some(v) = env.u64("RELAY_CONTEXT_TTL_SECS", 1, 30 * 24 * 3600) {
        settings.store.ttl_secs = v;
    }
    if let Some(v) = env.u64("RELAY_SWEEP_INTERVAL_SECS", 0, 24 * 3600) {
        settings.store.sweep_interval_secs = v;
    }

    // ── Workflow ────────────────────────────────────────────────────
    if let Some(v) = env.u64("RELAY_MAX_DISPATCHES", 1, 100) {
        settings.workflow.max_dispatches = v as u32;
    }
    if let Some(v) = env.u64("RELAY_CLASSIFIER_TIMEOUT_MS", 100, 600_000) {
        settings.workflow.classifier_timeout_ms = v;
    }
    if let Some(v) = env.u64("RELAY_HANDLER_TIMEOUT_MS", 100, 3_600_000) {
        settings.workflow.handler_timeout_ms = v;
    }

    // ── Classifier ──────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_CLASSIFIER_URL") {
        settings.classifier.base_url = v;
    }
    if let Some(v) = env.string("RELAY_CLASSIFIER_MODEL") {
        settings.classifier.model = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("RELAY_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_backend(val: &str) -> Option<StoreBackend> {
    match val.to_lowercase().as_str() {
        "memory" => Some(StoreBackend::Memory),
        "sqlite" => Some(StoreBackend::Sqlite),
        _ => None,
    }
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, |v| parse_u64_range(v, min, max))
    }
}
