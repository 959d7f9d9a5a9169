use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::HistoryEntry;

/// Input to a classification call.
#[derive(Clone, Debug)]
pub struct ClassifyRequest<'a> {
    pub input: &'a str,
    /// Registered capability names, already normalized.
    pub capabilities: &'a BTreeSet<String>,
    /// Dispatches made so far in the current turn.
    pub history: &'a [HistoryEntry],
}

/// Maps a request to a capability name.
///
/// Implementations are untrusted: any string is an acceptable answer, and
/// the router decides what it means.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, request: &ClassifyRequest<'_>) -> Result<String, ClassifierError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("panicked: {0}")]
    Panicked(String),
}
