use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use relay_engine::Orchestrator;

use crate::handlers;

/// Five dispatches, each at its 30s classifier and 120s handler limits.
const DEFAULT_TURN_DEADLINE: Duration = Duration::from_secs(750);

/// Headroom past the turn deadline for persisting context and writing the
/// envelope. Only then does the transport timeout cut the request.
const RESPONSE_GRACE: Duration = Duration::from_secs(30);

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Budget for one `run_agent` turn. When it elapses the turn is
    /// cancelled and still answers with an envelope.
    pub turn_deadline: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            turn_deadline: DEFAULT_TURN_DEADLINE,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub turn_deadline: Duration,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, turn_deadline: Duration) -> Self {
        Self {
            orchestrator,
            turn_deadline,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.turn_deadline + RESPONSE_GRACE;
    Router::new()
        .route("/", get(handlers::health))
        .route("/api/run_agent", post(handlers::run_agent))
        .route("/api/tools", get(handlers::list_tools))
        .route("/api/status/{session_id}", get(handlers::session_status))
        .route("/api/sessions/{session_id}", delete(handlers::delete_session))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until `shutdown` fires.
pub async fn start(
    config: ServerConfig,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState::new(orchestrator, config.turn_deadline));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "relay server started");

    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the server task to exit.
    pub async fn wait(self) {
        let _ = self.server.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use relay_core::{Context, HandlerOutput, SessionId};
    use relay_engine::mock::{MockCapability, MockInvocation, ScriptedClassifier};
    use relay_engine::{CapabilityRegistry, WorkflowConfig};
    use relay_store::{SessionStore, StoreConfig};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn orchestrator(label: &str) -> Arc<Orchestrator> {
        let github = MockCapability::returning(
            "github",
            HandlerOutput::done("3 open issues").with_context(
                Context::try_from(json!({"github": {"last_operation": "list_issues"}})).unwrap(),
            ),
        )
        .with_description("GitHub repository interaction");
        let registry = CapabilityRegistry::builder()
            .with(Arc::new(github))
            .unwrap()
            .build();
        Arc::new(Orchestrator::new(
            Arc::new(registry),
            Arc::new(ScriptedClassifier::always(label)),
            Arc::new(SessionStore::in_memory(StoreConfig::default())),
            WorkflowConfig::default(),
        ))
    }

    fn router(orchestrator: Arc<Orchestrator>) -> Router {
        build_router(AppState::new(orchestrator, Duration::from_secs(30)))
    }

    async fn call(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = router.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = call(router(orchestrator("github")), Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn run_agent_returns_envelope() {
        let (status, body) = call(
            router(orchestrator("github")),
            Method::POST,
            "/api/run_agent",
            Some(json!({"query": "list open issues for owner/repo", "session_id": "s1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["agent_used"], "github");
        assert_eq!(body["output"], "3 open issues");
        assert!(body["error"].is_null());
    }

    #[tokio::test]
    async fn run_agent_without_match_still_succeeds_at_http_level() {
        let (status, body) = call(
            router(orchestrator("weather")),
            Method::POST,
            "/api/run_agent",
            Some(json!({"query": "forecast?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["session_id"].as_str().unwrap().starts_with("sess_"));
        assert!(body["agent_used"].is_null());
        assert!(body["error"].as_str().unwrap().contains("no capability matched"));
    }

    #[tokio::test]
    async fn blank_query_is_unprocessable() {
        let (status, body) = call(
            router(orchestrator("github")),
            Method::POST,
            "/api/run_agent",
            Some(json!({"query": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "query must not be empty");
    }

    #[tokio::test]
    async fn missing_query_is_rejected() {
        let (status, _) = call(
            router(orchestrator("github")),
            Method::POST,
            "/api/run_agent",
            Some(json!({"session_id": "s1"})),
        )
        .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn tools_lists_registered_capabilities() {
        let (status, body) = call(router(orchestrator("github")), Method::GET, "/api/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tools"][0]["name"], "github");
        assert_eq!(body["tools"][0]["description"], "GitHub repository interaction");
    }

    #[tokio::test]
    async fn status_and_delete_follow_session_lifecycle() {
        let orchestrator = orchestrator("github");
        let _ = orchestrator.run_workflow("list issues", Some("s1")).await;

        let (_, body) = call(router(orchestrator.clone()), Method::GET, "/api/status/s1", None).await;
        assert_eq!(body["status"], "active");
        assert_eq!(body["keys"], json!(["github"]));

        let (status, body) =
            call(router(orchestrator.clone()), Method::DELETE, "/api/sessions/s1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);

        let (_, body) = call(router(orchestrator.clone()), Method::GET, "/api/status/s1", None).await;
        assert_eq!(body["status"], "unknown");
        assert!(orchestrator
            .store()
            .get(&SessionId::from_raw("s1"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn turn_past_deadline_still_returns_envelope_and_saves_progress() {
        let lookup = MockCapability::returning(
            "lookup",
            HandlerOutput::partial("found repo")
                .with_context(Context::try_from(json!({"lookup": {"repo": "o/r"}})).unwrap()),
        );
        let slow = MockCapability::new(
            "slow",
            vec![MockInvocation::Delay(
                Duration::from_secs(5),
                Box::new(MockInvocation::Output(HandlerOutput::done("too late"))),
            )],
        );
        let registry = CapabilityRegistry::builder()
            .with(Arc::new(lookup))
            .unwrap()
            .with(Arc::new(slow))
            .unwrap()
            .build();
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(registry),
            Arc::new(ScriptedClassifier::cycle(&["lookup", "slow"])),
            Arc::new(SessionStore::in_memory(StoreConfig::default())),
            WorkflowConfig::default(),
        ));
        let router = build_router(AppState::new(orchestrator.clone(), Duration::from_millis(100)));

        let (status, body) = call(
            router,
            Method::POST,
            "/api/run_agent",
            Some(json!({"query": "list issues", "session_id": "s-late"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], "s-late");
        assert_eq!(body["agent_used"], "slow");
        assert_eq!(body["output"], "found repo");
        assert_eq!(body["error"], "workflow cancelled");

        let stored = orchestrator
            .store()
            .get(&SessionId::from_raw("s-late"))
            .await
            .unwrap();
        assert_eq!(stored.get("lookup"), Some(&json!({"repo": "o/r"})));
    }

    #[tokio::test]
    async fn server_starts_and_shuts_down() {
        let shutdown = CancellationToken::new();
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, orchestrator("github"), shutdown.clone()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        shutdown.cancel();
        handle.wait().await;
    }
}
