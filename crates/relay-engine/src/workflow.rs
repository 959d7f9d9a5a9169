use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn, Span};

use relay_core::{Classifier, Context, SessionId, TurnId, WorkflowResult};
use relay_store::{Lookup, SessionStore};

use crate::machine::{TurnState, WorkflowConfig, WorkflowMachine};
use crate::registry::CapabilityRegistry;
use crate::router::IntentRouter;

const PERSIST_FAILED_WARNING: &str =
    "session context could not be saved; changes from this turn are not persisted";

/// Session-facing entry point: loads context, runs one turn, persists the
/// result, and always hands back a well-formed [`WorkflowResult`].
///
/// Holds no per-session state, so one instance serves any number of
/// concurrent sessions. Concurrent runs on the *same* session race:
/// the last `put` wins and the other turn's context update is lost.
pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    store: Arc<SessionStore>,
    machine: WorkflowMachine,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        classifier: Arc<dyn Classifier>,
        store: Arc<SessionStore>,
        config: WorkflowConfig,
    ) -> Self {
        let router = IntentRouter::new(classifier, Arc::clone(&registry), config.classifier_timeout);
        let machine = WorkflowMachine::new(Arc::clone(&registry), router, config);
        Self {
            registry,
            store,
            machine,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub async fn run_workflow(&self, query: &str, session_id: Option<&str>) -> WorkflowResult {
        self.run_workflow_with_cancel(query, session_id, &CancellationToken::new())
            .await
    }

    /// Like [`run_workflow`](Self::run_workflow), stopping at the next safe
    /// point once `cancel` fires.
    #[instrument(skip_all, fields(session_id = tracing::field::Empty, turn_id = %TurnId::new()))]
    pub async fn run_workflow_with_cancel(
        &self,
        query: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        // 1. Resolve session
        let session_id = SessionId::resolve(session_id);
        let _ = Span::current().record("session_id", session_id.as_str());
        let mut warnings = Vec::new();

        // 2. Load context
        let context = match self.store.load(&session_id).await {
            Lookup::Hit(context) => context,
            Lookup::Miss => Context::new(),
            Lookup::Unavailable(reason) => {
                warn!(reason = %reason, "continuing with empty context");
                warnings.push(format!("{reason}; continuing without prior session context"));
                Context::new()
            }
        };

        // 3-4. Run the turn
        let mut state = TurnState::new(query, context);
        self.machine.run(&mut state, cancel).await;

        // 5. Persist
        if state.context_mutated() && !self.store.put(&session_id, state.context()).await {
            warnings.push(PERSIST_FAILED_WARNING.to_string());
        }

        // 6. Envelope
        let result = state.into_result(session_id, warnings);
        info!(
            agent_used = result.agent_used.as_deref().unwrap_or("none"),
            success = result.is_success(),
            warnings = result.warnings.len(),
            "workflow finished"
        );
        result
    }
}
