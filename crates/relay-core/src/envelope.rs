use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Normalized result of one `run_workflow` call.
///
/// Always well formed: `session_id` is set even when the turn failed, and
/// `error` carries the terminal error when there is one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub session_id: SessionId,
    pub agent_used: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Storage continuity warnings. Empty when the session context was
    /// loaded and saved normally.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl WorkflowResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
