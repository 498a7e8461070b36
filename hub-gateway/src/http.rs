//! HTTP API (C7): health, webhook forwarding, and the bearer-authenticated task/agent
//! endpoints (§4.7, §6).

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use hub_core::CreateTaskParams;
use hub_protocol::http::{
    AgentView, CreateTaskRequest, CreateTaskResponse, ErrorResponse, HealthResponse, ListAgentsResponse,
};
use hub_protocol::TaskStatus;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::auth::CallerIdentity;
use crate::state::AppState;
use crate::views::{agent_to_view, task_to_view};

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Forwards a platform webhook update to the chat adapter, if one is registered. The payload
/// is opaque to the gateway (§4.8: C6 owns parsing platform-specific updates).
pub async fn webhook(State(state): State<Arc<AppState>>, Json(update): Json<Value>) -> StatusCode {
    match state.callbacks() {
        Some(callbacks) => {
            callbacks.on_webhook_update(update).await;
            StatusCode::OK
        }
        None => {
            warn!("webhook received before the chat adapter registered its callbacks");
            StatusCode::OK
        }
    }
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Response, Response> {
    if req.to.trim().is_empty() || req.content.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "to and content are required"));
    }

    let Some(owner_id) = state.registry.credential_owner(&req.to).await else {
        return Err(error_response(StatusCode::NOT_FOUND, "unknown target agent"));
    };

    let task = state
        .tasks
        .create_task(CreateTaskParams {
            from: caller.0.clone(),
            to: req.to.clone(),
            content: req.content.clone(),
            chat_id: state.config.default_chat_id.unwrap_or_default(),
            message_id: 0,
            conversation_id: None,
            parent_task_id: None,
        })
        .await;

    // §4.5 dispatch flow step 1 applies to API-submitted tasks too: pending -> awaiting_approval.
    let task = match state.tasks.update_status(&task.task_id, TaskStatus::AwaitingApproval, None).await {
        Ok(update) => update.task,
        Err(e) => {
            warn!(task_id = %task.task_id, error = %e, "could not move API task to awaiting_approval");
            task
        }
    };

    if let Some(callbacks) = state.callbacks() {
        callbacks.on_api_task_created(task.clone(), Some(owner_id)).await;
    }

    let response = CreateTaskResponse {
        task_id: task.task_id,
        status: task.status,
        message: "task created, awaiting approval".to_string(),
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

pub async fn get_task(State(state): State<Arc<AppState>>, Path(task_id): Path<String>) -> Result<Response, Response> {
    match state.tasks.get(&task_id).await {
        Some(task) => Ok(Json(task_to_view(&task)).into_response()),
        None => Err(error_response(StatusCode::NOT_FOUND, "task not found")),
    }
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<ListAgentsResponse> {
    let agents: Vec<AgentView> = state.registry.list_all().await.iter().map(agent_to_view).collect();
    Json(ListAgentsResponse { agents })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}
