use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
