use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use relay_core::{CapabilityInfo, SessionId, WorkflowResult};
use relay_store::Lookup;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct RunAgentRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolsResponse {
    pub tools: Vec<CapabilityInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: String,
    /// `active` when the session has live context, otherwise `unknown`.
    pub status: String,
    /// Top-level context namespaces.
    pub keys: Vec<String>,
}

/// Request rejected before reaching the orchestrator.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "message": "Relay orchestrator is running",
    }))
}

#[instrument(skip_all)]
pub async fn run_agent(
    State(state): State<AppState>,
    Json(request): Json<RunAgentRequest>,
) -> Result<Json<WorkflowResult>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::unprocessable("query must not be empty"));
    }
    let cancel = CancellationToken::new();
    let turn = state.orchestrator.run_workflow_with_cancel(
        &request.query,
        request.session_id.as_deref(),
        &cancel,
    );
    tokio::pin!(turn);

    // Past the deadline the turn is cancelled rather than dropped, so it
    // still persists completed dispatches and returns its envelope.
    let result = tokio::select! {
        result = &mut turn => result,
        _ = tokio::time::sleep(state.turn_deadline) => {
            warn!(deadline_ms = state.turn_deadline.as_millis() as u64, "turn deadline reached");
            cancel.cancel();
            turn.await
        }
    };
    Ok(Json(result))
}

pub async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.orchestrator.registry().infos(),
    })
}

pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = SessionId::from_raw(session_id.clone());
    let (status, keys) = match state.orchestrator.store().load(&id).await {
        Lookup::Hit(context) => ("active", context.keys().cloned().collect()),
        Lookup::Miss => ("unknown", Vec::new()),
        Lookup::Unavailable(reason) => return Err(ApiError::unavailable(reason)),
    };
    Ok(Json(StatusResponse {
        session_id,
        status: status.to_string(),
        keys,
    }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = SessionId::from_raw(session_id);
    if state.orchestrator.store().delete(&id).await {
        Ok(Json(json!({"deleted": true})))
    } else {
        Err(ApiError::unavailable("context store unavailable"))
    }
}
