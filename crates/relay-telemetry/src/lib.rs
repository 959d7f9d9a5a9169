use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for log output.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "relay_store" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Parse a level name such as `info` or `WARN`.
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}

/// `EnvFilter` directives for `config`, e.g. `info,relay_store=debug`.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))
}
