use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::Context;

/// Envelope every capability hands back to the orchestrator.
///
/// `complete == false` asks the orchestrator to route the same input again
/// within the current turn. An envelope carrying `error` is a failed
/// invocation and ends the turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutput {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandlerOutput {
    /// A finished result.
    pub fn done(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            complete: true,
            ..Default::default()
        }
    }

    /// A result that hands the turn back to the router.
    pub fn partial(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            complete: false,
            ..Default::default()
        }
    }

    /// A failure reported through the envelope instead of an `Err`.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            complete: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, fragment: Context) -> Self {
        self.context = fragment;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Name and description of a registered capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
}

/// A named unit of domain logic the orchestrator can dispatch to.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn invoke(&self, input: &str, context: &Context) -> Result<HandlerOutput, CapabilityError>;

    fn info(&self) -> CapabilityInfo {
        CapabilityInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("execution failed: {0}")]
    Failed(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("panicked: {0}")]
    Panicked(String),
}
