//! Conversions from `hub-core` domain types to `hub-protocol` wire DTOs, shared between the
//! WebSocket demuxer's `task_status` reply and the HTTP API's task/agent views.

use hub_core::{AgentInfo, Task};
use hub_protocol::http::{AgentView, TaskView};

pub fn task_to_view(task: &Task) -> TaskView {
    TaskView {
        task_id: task.task_id.clone(),
        from: task.from.clone(),
        to: task.to.clone(),
        content: task.content.clone(),
        status: task.status,
        result: task.result.clone(),
        created_at: task.created_at,
        completed_at: task.completed_at,
        conversation_id: task.conversation_id.clone(),
        parent_task_id: task.parent_task_id.clone(),
    }
}

pub fn agent_to_view(info: &AgentInfo) -> AgentView {
    AgentView {
        name: info.name.clone(),
        online: info.online,
        owner_id: info.owner_id,
    }
}
