use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use relay_core::{
    CapabilityError, Context, HandlerOutput, HistoryEntry, SessionId, WorkflowResult,
};

use crate::error::WorkflowError;
use crate::registry::CapabilityRegistry;
use crate::router::{panic_message, IntentRouter, Route};

const DEFAULT_MAX_DISPATCHES: u32 = 5;
const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-turn limits.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Handler invocations allowed in one turn before the chain is cut.
    pub max_dispatches: u32,
    pub classifier_timeout: Duration,
    pub handler_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_dispatches: DEFAULT_MAX_DISPATCHES,
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }
}

/// Mutable state of one turn. Created per `run_workflow` call and thrown
/// away afterwards.
#[derive(Clone, Debug)]
pub struct TurnState {
    input: String,
    context: Context,
    history: Vec<HistoryEntry>,
    selected: Option<String>,
    output: Option<String>,
    error: Option<WorkflowError>,
    dispatches: u32,
    context_mutated: bool,
}

impl TurnState {
    pub fn new(input: impl Into<String>, context: Context) -> Self {
        Self {
            input: input.into(),
            context,
            history: Vec::new(),
            selected: None,
            output: None,
            error: None,
            dispatches: 0,
            context_mutated: false,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Last capability the router selected.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Response text of the last successful dispatch.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        self.error.as_ref()
    }

    /// Handler invocations started this turn, successful or not.
    pub fn dispatches(&self) -> u32 {
        self.dispatches
    }

    /// Whether any successful dispatch wrote into the context.
    pub fn context_mutated(&self) -> bool {
        self.context_mutated
    }

    /// Names of the capabilities dispatched so far, in order.
    fn chain(&self) -> Vec<String> {
        self.history.iter().map(|h| h.capability.clone()).collect()
    }

    fn fail(&mut self, error: WorkflowError) -> Phase {
        self.error = Some(error);
        Phase::Terminated
    }

    fn apply(&mut self, capability: String, out: HandlerOutput) {
        if self.context.merge(out.context) {
            self.context_mutated = true;
        }
        self.history.push(HistoryEntry {
            capability,
            input: self.input.clone(),
            output: out.response.clone(),
        });
        self.output = Some(out.response);
    }

    pub fn into_result(self, session_id: SessionId, warnings: Vec<String>) -> WorkflowResult {
        WorkflowResult {
            session_id,
            agent_used: self.selected,
            output: self.output,
            error: self.error.map(|e| e.to_string()),
            warnings,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Routing,
    Dispatched(String),
    Terminated,
}

/// Drives one turn through `Routing → Dispatched → (Routing | Terminated)`.
pub struct WorkflowMachine {
    registry: Arc<CapabilityRegistry>,
    router: IntentRouter,
    config: WorkflowConfig,
}

impl WorkflowMachine {
    pub fn new(registry: Arc<CapabilityRegistry>, router: IntentRouter, config: WorkflowConfig) -> Self {
        Self {
            registry,
            router,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run the turn to termination. Every failure ends up in
    /// `state.error()`; nothing is returned.
    #[instrument(skip_all, fields(max_dispatches = self.config.max_dispatches))]
    pub async fn run(&self, state: &mut TurnState, cancel: &CancellationToken) {
        let mut phase = Phase::Routing;
        loop {
            phase = match phase {
                Phase::Routing => self.route(state, cancel).await,
                Phase::Dispatched(capability) => self.dispatch(state, capability, cancel).await,
                Phase::Terminated => break,
            };
        }
        debug!(
            dispatches = state.dispatches,
            failed = state.error.is_some(),
            "turn terminated"
        );
    }

    async fn route(&self, state: &mut TurnState, cancel: &CancellationToken) -> Phase {
        if cancel.is_cancelled() {
            return state.fail(WorkflowError::Cancelled);
        }

        if state.dispatches >= self.config.max_dispatches {
            let chain = state.chain();
            warn!(limit = self.config.max_dispatches, chain = ?chain, "chain limit reached");
            return state.fail(WorkflowError::ChainLimitExceeded {
                limit: self.config.max_dispatches,
                chain,
            });
        }

        let route = tokio::select! {
            biased;
            _ = cancel.cancelled() => return state.fail(WorkflowError::Cancelled),
            route = self.router.route(&state.input, &state.history) => route,
        };

        match route {
            Route::Matched(capability) => {
                state.selected = Some(capability.clone());
                Phase::Dispatched(capability)
            }
            Route::Unmatched { reason } if state.dispatches == 0 => {
                info!(reason = %reason, "no capability matched");
                state.fail(WorkflowError::NoCapabilityMatched)
            }
            Route::Unmatched { reason } => {
                // A handler already produced output this turn; keep it.
                debug!(reason = %reason, "no further route, ending turn");
                Phase::Terminated
            }
        }
    }

    #[instrument(skip(self, state, cancel), fields(dispatch = state.dispatches + 1))]
    async fn dispatch(&self, state: &mut TurnState, capability: String, cancel: &CancellationToken) -> Phase {
        let Some(handler) = self.registry.get(&capability) else {
            return state.fail(WorkflowError::NoCapabilityMatched);
        };
        state.dispatches += 1;

        let timeout = self.config.handler_timeout;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("cancelled during dispatch, discarding in-flight result");
                return state.fail(WorkflowError::Cancelled);
            }
            r = tokio::time::timeout(
                timeout,
                AssertUnwindSafe(handler.invoke(&state.input, &state.context)).catch_unwind(),
            ) => r,
        };

        let failure = match result {
            Ok(Ok(Ok(mut out))) => match out.error.take() {
                Some(message) => message,
                None => {
                    let complete = out.complete;
                    state.apply(capability, out);
                    return if complete {
                        Phase::Terminated
                    } else {
                        debug!("handler asked to continue, re-routing");
                        Phase::Routing
                    };
                }
            },
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(panic)) => CapabilityError::Panicked(panic_message(&panic)).to_string(),
            Err(_) => CapabilityError::Timeout(timeout).to_string(),
        };

        warn!(error = %failure, "capability failed");
        state.fail(WorkflowError::Handler {
            capability,
            message: failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCapability, MockInvocation, ScriptedClassifier};
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> Context {
        Context::try_from(value).unwrap()
    }

    fn machine(
        classifier: ScriptedClassifier,
        capabilities: Vec<Arc<MockCapability>>,
        config: WorkflowConfig,
    ) -> WorkflowMachine {
        let mut builder = CapabilityRegistry::builder();
        for cap in capabilities {
            let _ = builder.register(cap).unwrap();
        }
        let registry = Arc::new(builder.build());
        let router = IntentRouter::new(Arc::new(classifier), registry.clone(), config.classifier_timeout);
        WorkflowMachine::new(registry, router, config)
    }

    async fn run(machine: &WorkflowMachine, context: Context) -> TurnState {
        let mut state = TurnState::new("do the thing", context);
        machine.run(&mut state, &CancellationToken::new()).await;
        state
    }

    #[tokio::test]
    async fn complete_handler_terminates_successfully() {
        let github = Arc::new(MockCapability::returning(
            "github",
            HandlerOutput::done("3 open issues").with_context(ctx(json!({"github": {"open": 3}}))),
        ));
        let m = machine(ScriptedClassifier::always("github"), vec![github.clone()], WorkflowConfig::default());

        let state = run(&m, Context::new()).await;
        assert!(state.error().is_none());
        assert_eq!(state.selected(), Some("github"));
        assert_eq!(state.output(), Some("3 open issues"));
        assert_eq!(state.dispatches(), 1);
        assert!(state.context_mutated());
        assert_eq!(state.context().get("github"), Some(&json!({"open": 3})));
        assert_eq!(github.call_count(), 1);
    }

    #[tokio::test]
    async fn partial_result_reroutes_with_updated_context() {
        let lookup = Arc::new(MockCapability::returning(
            "lookup",
            HandlerOutput::partial("found repo").with_context(ctx(json!({"lookup": {"repo": "o/r"}}))),
        ));
        let github = Arc::new(MockCapability::done("github", "3 open issues"));
        let classifier = ScriptedClassifier::cycle(&["lookup", "github"]);
        let m = machine(classifier, vec![lookup, github.clone()], WorkflowConfig::default());

        let state = run(&m, Context::new()).await;
        assert!(state.error().is_none());
        assert_eq!(state.selected(), Some("github"));
        assert_eq!(state.output(), Some("3 open issues"));
        assert_eq!(state.history().len(), 2);

        // Second handler saw the first one's fragment and the same input
        let calls = github.calls();
        assert_eq!(calls[0].0, "do the thing");
        assert!(calls[0].1.contains_key("lookup"));
    }

    #[tokio::test]
    async fn ping_pong_stops_at_chain_limit() {
        let ping = Arc::new(MockCapability::returning("ping", HandlerOutput::partial("ping")));
        let pong = Arc::new(MockCapability::returning("pong", HandlerOutput::partial("pong")));
        let classifier = ScriptedClassifier::cycle(&["ping", "pong"]);
        let m = machine(classifier, vec![ping.clone(), pong.clone()], WorkflowConfig::default());

        let state = run(&m, Context::new()).await;
        assert_eq!(state.dispatches(), 5);
        assert_eq!(ping.call_count() + pong.call_count(), 5);
        match state.error() {
            Some(WorkflowError::ChainLimitExceeded { limit, chain }) => {
                assert_eq!(*limit, 5);
                assert_eq!(chain, &["ping", "pong", "ping", "pong", "ping"]);
            }
            other => panic!("expected chain limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chain_limit_is_configurable() {
        let looping = Arc::new(MockCapability::returning("loop", HandlerOutput::partial("again")));
        let config = WorkflowConfig {
            max_dispatches: 2,
            ..Default::default()
        };
        let m = machine(ScriptedClassifier::always("loop"), vec![looping.clone()], config);

        let state = run(&m, Context::new()).await;
        assert_eq!(looping.call_count(), 2);
        assert!(matches!(state.error(), Some(WorkflowError::ChainLimitExceeded { limit: 2, .. })));
    }

    #[tokio::test]
    async fn no_match_before_any_dispatch_is_an_error() {
        let m = machine(
            ScriptedClassifier::always("weather"),
            vec![Arc::new(MockCapability::done("github", "ok"))],
            WorkflowConfig::default(),
        );
        let state = run(&m, Context::new()).await;
        assert_eq!(state.error(), Some(&WorkflowError::NoCapabilityMatched));
        assert_eq!(state.selected(), None);
        assert_eq!(state.output(), None);
        assert_eq!(state.dispatches(), 0);
    }

    #[tokio::test]
    async fn no_match_after_a_dispatch_keeps_prior_output() {
        let lookup = Arc::new(MockCapability::returning("lookup", HandlerOutput::partial("halfway")));
        let classifier = ScriptedClassifier::cycle(&["lookup", "nonsense"]);
        let m = machine(classifier, vec![lookup], WorkflowConfig::default());

        let state = run(&m, Context::new()).await;
        assert!(state.error().is_none());
        assert_eq!(state.selected(), Some("lookup"));
        assert_eq!(state.output(), Some("halfway"));
    }

    #[tokio::test]
    async fn handler_error_is_recorded_verbatim() {
        let outreach = Arc::new(MockCapability::failing("outreach", "smtp relay refused"));
        let m = machine(ScriptedClassifier::always("outreach"), vec![outreach], WorkflowConfig::default());

        let state = run(&m, ctx(json!({"keep": 1}))).await;
        assert_eq!(state.selected(), Some("outreach"));
        assert_eq!(state.output(), None);
        assert!(!state.context_mutated());
        let err = state.error().unwrap().to_string();
        assert!(err.contains("smtp relay refused"), "got: {err}");
    }

    #[tokio::test]
    async fn envelope_error_fails_without_merging() {
        let mut out = HandlerOutput::failed("quota exhausted");
        out.context = ctx(json!({"outreach": {"half": true}}));
        out.response = "partial text".into();
        let outreach = Arc::new(MockCapability::returning("outreach", out));
        let m = machine(ScriptedClassifier::always("outreach"), vec![outreach], WorkflowConfig::default());

        let state = run(&m, Context::new()).await;
        assert_eq!(
            state.error(),
            Some(&WorkflowError::Handler {
                capability: "outreach".into(),
                message: "quota exhausted".into(),
            })
        );
        assert!(!state.context().contains_key("outreach"));
        assert!(state.history().is_empty());
        assert_eq!(state.output(), None);
    }

    #[tokio::test]
    async fn handler_panic_is_a_failure() {
        let m = machine(
            ScriptedClassifier::always("github"),
            vec![Arc::new(MockCapability::panicking("github", "index out of bounds"))],
            WorkflowConfig::default(),
        );
        let state = run(&m, Context::new()).await;
        let err = state.error().unwrap().to_string();
        assert!(err.contains("index out of bounds"), "got: {err}");
    }

    #[tokio::test(start_paused = true)]
    async fn handler_timeout_is_a_failure() {
        let slow = Arc::new(MockCapability::new(
            "slow",
            vec![MockInvocation::Delay(
                Duration::from_secs(600),
                Box::new(MockInvocation::Output(HandlerOutput::done("late"))),
            )],
        ));
        let config = WorkflowConfig {
            handler_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let m = machine(ScriptedClassifier::always("slow"), vec![slow], config);

        let state = run(&m, Context::new()).await;
        assert_eq!(state.output(), None);
        let err = state.error().unwrap().to_string();
        assert!(err.contains("timed out"), "got: {err}");
    }

    #[tokio::test]
    async fn cancelled_before_start_dispatches_nothing() {
        let github = Arc::new(MockCapability::done("github", "ok"));
        let m = machine(ScriptedClassifier::always("github"), vec![github.clone()], WorkflowConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut state = TurnState::new("x", Context::new());
        m.run(&mut state, &cancel).await;

        assert_eq!(state.error(), Some(&WorkflowError::Cancelled));
        assert_eq!(github.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_dispatch_discards_result() {
        let slow = Arc::new(MockCapability::new(
            "slow",
            vec![MockInvocation::Delay(
                Duration::from_secs(10),
                Box::new(MockInvocation::Output(
                    HandlerOutput::done("late").with_context(ctx(json!({"slow": 1}))),
                )),
            )],
        ));
        let m = machine(ScriptedClassifier::always("slow"), vec![slow], WorkflowConfig::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut state = TurnState::new("x", Context::new());
        m.run(&mut state, &cancel).await;

        assert_eq!(state.error(), Some(&WorkflowError::Cancelled));
        assert_eq!(state.output(), None);
        assert!(!state.context_mutated());
        assert!(state.context().is_empty());
    }

    #[tokio::test]
    async fn merge_is_shallow() {
        let github = Arc::new(MockCapability::returning(
            "github",
            HandlerOutput::done("ok").with_context(ctx(json!({"github": {"last_operation": "list"}}))),
        ));
        let m = machine(ScriptedClassifier::always("github"), vec![github], WorkflowConfig::default());

        let prior = ctx(json!({
            "github": {"last_repo": "o/r", "last_operation": "get"},
            "outreach": {"drafts": 2},
        }));
        let state = run(&m, prior).await;
        assert_eq!(
            state.context(),
            &ctx(json!({
                "github": {"last_operation": "list"},
                "outreach": {"drafts": 2},
            }))
        );
    }

    #[tokio::test]
    async fn into_result_shapes_envelope() {
        let m = machine(
            ScriptedClassifier::always("weather"),
            vec![Arc::new(MockCapability::done("github", "ok"))],
            WorkflowConfig::default(),
        );
        let state = run(&m, Context::new()).await;
        let result = state.into_result(SessionId::from_raw("s1"), vec!["w".into()]);
        assert_eq!(result.session_id.as_str(), "s1");
        assert_eq!(result.agent_used, None);
        assert!(result.error.unwrap().contains("no capability matched"));
        assert_eq!(result.warnings, vec!["w".to_string()]);
    }
}
