//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section is
//! `#[serde(default)]`, so partial JSON fills the gaps from [`Default`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "store": { "backend": "sqlite", "ttlSecs": 7200 },
///   "capabilities": {
///     "github": { "url": "http://localhost:7001/invoke", "description": "GitHub operations" }
///   }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub workflow: WorkflowSettings,
    pub classifier: ClassifierSettings,
    /// Remote capabilities by name.
    pub capabilities: BTreeMap<String, CapabilitySettings>,
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Budget for one HTTP-driven turn: `server.turnDeadlineSecs`, or
    /// every allowed dispatch hitting both its classifier and handler
    /// timeouts.
    pub fn turn_deadline(&self) -> Duration {
        match self.server.turn_deadline_secs {
            Some(secs) => Duration::from_secs(secs),
            None => {
                let per_dispatch =
                    self.workflow.classifier_timeout_ms + self.workflow.handler_timeout_ms;
                Duration::from_millis(per_dispatch * u64::from(self.workflow.max_dispatches))
            }
        }
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.store.ttl_secs == 0 {
            return Err(SettingsError::InvalidValue("store.ttlSecs must be at least 1".into()));
        }
        if self.workflow.max_dispatches == 0 {
            return Err(SettingsError::InvalidValue(
                "workflow.maxDispatches must be at least 1".into(),
            ));
        }
        if self.workflow.handler_timeout_ms == 0 || self.workflow.classifier_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue("workflow timeouts must be non-zero".into()));
        }
        if self.server.turn_deadline_secs == Some(0) {
            return Err(SettingsError::InvalidValue(
                "server.turnDeadlineSecs must be at least 1".into(),
            ));
        }
        for (name, cap) in &self.capabilities {
            if name.trim().is_empty() {
                return Err(SettingsError::InvalidValue("capability name must not be empty".into()));
            }
            if cap.url.trim().is_empty() {
                return Err(SettingsError::InvalidValue(format!(
                    "capabilities.{name}.url must be set"
                )));
            }
        }
        Ok(())
    }
}

/// HTTP listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Wall-clock budget for one `run_agent` request. Unset means the worst
    /// case the workflow limits allow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_deadline_secs: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            turn_deadline_secs: None,
        }
    }
}

/// Which context backend to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Session context store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// SQLite file, relative to `~/.relay` unless absolute.
    pub sqlite_path: String,
    /// Sliding expiry since last access.
    pub ttl_secs: u64,
    /// Background sweep period. 0 disables the sweeper.
    pub sweep_interval_secs: u64,
    /// Amortized sweep every N successful writes. 0 disables it.
    pub sweep_every_puts: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: "contexts.db".to_string(),
            ttl_secs: 3600,
            sweep_interval_secs: 60,
            sweep_every_puts: 10,
        }
    }
}

impl StoreSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Resolve `sqlite_path` against `home`.
    pub fn sqlite_path_in(&self, home: &Path) -> PathBuf {
        let path = Path::new(&self.sqlite_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            home.join(path)
        }
    }
}

/// Per-turn limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    pub max_dispatches: u32,
    pub classifier_timeout_ms: u64,
    pub handler_timeout_ms: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_dispatches: 5,
            classifier_timeout_ms: 30_000,
            handler_timeout_ms: 120_000,
        }
    }
}

/// OpenAI-compatible classification model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierSettings {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. The key itself never
    /// lives in the settings file.
    pub api_key_env: String,
    pub request_timeout_ms: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// One remote capability endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilitySettings {
    pub url: String,
    pub description: String,
    /// HTTP timeout; falls back to `workflow.handlerTimeoutMs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Per-module level overrides, e.g. `{"relay_store": "debug"}`.
    pub modules: BTreeMap<String, String>,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            json: false,
        }
    }
}
