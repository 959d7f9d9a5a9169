//! Blocking access to the async orchestrator for synchronous callers.
//!
//! The adapter owns a small current-thread runtime and drives the one async
//! implementation on it. Do not call it from inside a Tokio runtime; use
//! [`Orchestrator`] directly there.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use relay_core::WorkflowResult;

use crate::workflow::Orchestrator;

/// Drives futures to completion on a private runtime.
pub struct BlockingRuntime {
    runtime: Runtime,
}

impl BlockingRuntime {
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime })
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Synchronous facade over [`Orchestrator`].
pub struct BlockingOrchestrator {
    runtime: BlockingRuntime,
    inner: Arc<Orchestrator>,
}

impl BlockingOrchestrator {
    pub fn new(inner: Arc<Orchestrator>) -> std::io::Result<Self> {
        Ok(Self {
            runtime: BlockingRuntime::new()?,
            inner,
        })
    }

    pub fn inner(&self) -> &Arc<Orchestrator> {
        &self.inner
    }

    pub fn run_workflow(&self, query: &str, session_id: Option<&str>) -> WorkflowResult {
        self.runtime.block_on(self.inner.run_workflow(query, session_id))
    }

    pub fn run_workflow_with_cancel(
        &self,
        query: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        self.runtime
            .block_on(self.inner.run_workflow_with_cancel(query, session_id, cancel))
    }
}
