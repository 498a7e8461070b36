//! Routes typed agent→hub frames once a connection is `Registered` (§4.4).
//!
//! A closed sum over `AgentMessage`'s `type` tag; every variant is matched explicitly rather
//! than folded into a catch-all, so a new frame type is a compile error here until handled
//! (§9 design notes: "tagged variant and exhaustive matching").

use crate::state::AppState;
use chrono::Utc;
use hub_protocol::agent::*;
use hub_protocol::{AgentMessage, HubMessage, TaskStatus};
use std::sync::Arc;
use tracing::warn;

pub async fn dispatch(state: &Arc<AppState>, agent_name: &str, message: AgentMessage) {
    state.registry.touch(agent_name).await;

    match message {
        AgentMessage::Register(_) => {
            // Already registered; a second register frame is ignored (§6: malformed/unexpected
            // frames are dropped silently).
        }
        AgentMessage::Pong(_) => {}
        AgentMessage::TaskResult(frame) => handle_task_result(state, agent_name, frame).await,
        AgentMessage::TaskCancelled(frame) => handle_task_cancelled(state, agent_name, frame).await,
        AgentMessage::TaskProgress(frame) => handle_task_progress(state, frame).await,
        AgentMessage::StatusReport(frame) => handle_status_report(state, agent_name, frame).await,
        AgentMessage::ListAgents(req) => handle_list_agents(state, agent_name, req).await,
        AgentMessage::TaskStatus(req) => handle_task_status(state, agent_name, req).await,
        AgentMessage::SendMessage(_) => {
            // Reserved; no-op in the current core (§6).
        }
    }
}

async fn handle_task_result(state: &Arc<AppState>, agent_name: &str, frame: TaskResultFrame) {
    let new_status = match frame.status {
        ResultOutcome::Success => TaskStatus::Completed,
        ResultOutcome::Error => TaskStatus::Failed,
    };
    match state.tasks.update_status(&frame.task_id, new_status, Some(frame.result)).await {
        // A repeated terminal transition is dropped without error (§7): no second counter
        // bump, no second callback firing the chat adapter's "task done" message again.
        Ok(update) if !update.applied => {}
        Ok(update) => {
            match new_status {
                TaskStatus::Completed => state.status_cache.record_completed(agent_name).await,
                TaskStatus::Failed => state.status_cache.record_failed(agent_name).await,
                _ => unreachable!(),
            }
            if let Some(callbacks) = state.callbacks() {
                callbacks.on_task_result(update.task).await;
            }
        }
        Err(e) => warn!(task_id = %frame.task_id, error = %e, "task_result for unknown or terminal task"),
    }
}

async fn handle_task_cancelled(state: &Arc<AppState>, _agent_name: &str, frame: TaskCancelledFrame) {
    match state.tasks.update_status(&frame.task_id, TaskStatus::Cancelled, None).await {
        Ok(update) if !update.applied => {}
        Ok(update) => {
            if let Some(callbacks) = state.callbacks() {
                callbacks.on_task_cancelled(update.task).await;
            }
        }
        Err(e) => warn!(task_id = %frame.task_id, error = %e, "task_cancelled for unknown or terminal task"),
    }
}

async fn handle_task_progress(state: &Arc<AppState>, frame: TaskProgressFrame) {
    if let Some(callbacks) = state.callbacks() {
        callbacks.on_task_progress(&frame.task_id, &frame.status, frame.detail, frame.elapsed_ms).await;
    }
}

async fn handle_status_report(state: &Arc<AppState>, agent_name: &str, frame: StatusReportFrame) {
    state
        .status_cache
        .update_from_report(agent_name, frame.running_tasks, frame.current_task_id, frame.idle_since)
        .await;
}

async fn handle_list_agents(state: &Arc<AppState>, agent_name: &str, req: ListAgentsRequest) {
    let agents = state
        .registry
        .list_online()
        .await
        .into_iter()
        .map(|info| hub_protocol::hub::AgentInfo {
            name: info.name,
            status: "online".to_string(),
            connected_at: info.connected_at.unwrap_or_else(Utc::now),
            last_seen: info.last_seen.unwrap_or_else(Utc::now),
            owner_id: info.owner_id,
        })
        .collect();

    let response = HubMessage::ListAgentsResponse(hub_protocol::hub::ListAgentsResponse {
        request_id: req.request_id,
        agents,
    });
    state.registry.send_to(agent_name, response).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppState, GatewayConfig};
    use hub_core::{AgentStatusCache, CreateTaskParams, Registry, TaskStore};
    use hub_storage::FileCredentialStore;

    async fn state_with_online_agent(agent_name: &str) -> (Arc<AppState>, tokio::sync::mpsc::UnboundedReceiver<HubMessage>) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn hub_core::CredentialStore> = Arc::new(FileCredentialStore::new(dir.path()).unwrap());
        let registry = Arc::new(Registry::load(store).await.unwrap());
        registry.issue_token(agent_name, 1).await;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let (evict, _evict_rx) = tokio::sync::oneshot::channel();
        registry.register(agent_name, hub_core::ConnectionHandle { sender: tx, evict }).await;

        let tasks = Arc::new(TaskStore::new(None));
        let status_cache = Arc::new(AgentStatusCache::new());
        let state = Arc::new(AppState::new(registry, tasks, status_cache, GatewayConfig::default()));
        (state, rx)
    }

    // create -> auto-approve -> dispatch -> running -> task_result, exercised through the real
    // dispatch_task/handle_task_result call sites rather than task_store/state_machine alone.
    #[tokio::test]
    async fn full_chain_from_auto_approval_through_result() {
        let (state, mut rx) = state_with_online_agent("agent-a").await;

        let task = state
            .tasks
            .create_task(CreateTaskParams {
                from: "1".to_string(),
                to: "agent-a".to_string(),
                content: "do the thing".to_string(),
                chat_id: 10,
                message_id: 1,
                conversation_id: None,
                parent_task_id: None,
            })
            .await;

        // Owner auto-approval skips awaiting_approval entirely (§4.6).
        let approved = state.tasks.update_status(&task.task_id, TaskStatus::Approved, None).await.unwrap();
        assert!(approved.applied);
        assert_eq!(approved.task.status, TaskStatus::Approved);

        let sent = hub_core::dispatch_task(&state.registry, &state.tasks, &approved.task).await;
        assert!(sent);
        assert!(rx.recv().await.is_some(), "dispatch should push a task frame to the agent");

        let running = state.tasks.get(&task.task_id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Running);

        dispatch(
            &state,
            "agent-a",
            AgentMessage::TaskResult(TaskResultFrame {
                task_id: task.task_id.clone(),
                result: "done".to_string(),
                status: ResultOutcome::Success,
            }),
        )
        .await;

        let completed = state.tasks.get(&task.task_id).await.unwrap();
        assert_eq!(completed.status, TaskStatus::Completed);
        assert_eq!(state.status_cache.snapshot("agent-a").await.map(|s| s.completed_count), Some(1));
    }

    #[tokio::test]
    async fn duplicate_task_result_does_not_double_count() {
        let (state, _rx) = state_with_online_agent("agent-b").await;
        let task = state
            .tasks
            .create_task(CreateTaskParams {
                from: "1".to_string(),
                to: "agent-b".to_string(),
                content: "do it".to_string(),
                chat_id: 10,
                message_id: 1,
                conversation_id: None,
                parent_task_id: None,
            })
            .await;
        state.tasks.update_status(&task.task_id, TaskStatus::Approved, None).await.unwrap();
        hub_core::dispatch_task(&state.registry, &state.tasks, &state.tasks.get(&task.task_id).await.unwrap()).await;

        let frame = || {
            AgentMessage::TaskResult(TaskResultFrame {
                task_id: task.task_id.clone(),
                result: "done".to_string(),
                status: ResultOutcome::Success,
            })
        };
        dispatch(&state, "agent-b", frame()).await;
        dispatch(&state, "agent-b", frame()).await;

        assert_eq!(state.status_cache.snapshot("agent-b").await.map(|s| s.completed_count), Some(1));
    }
}

async fn handle_task_status(state: &Arc<AppState>, agent_name: &str, req: TaskStatusRequest) {
    let task = state.tasks.get(&req.task_id).await;
    let task_json = task
        .map(|t| crate::views::task_to_view(&t))
        .and_then(|view| serde_json::to_value(view).ok());
    let response = HubMessage::TaskStatusResponse(hub_protocol::hub::TaskStatusResponse {
        request_id: req.request_id,
        task: task_json,
    });
    state.registry.send_to(agent_name, response).await;
}
