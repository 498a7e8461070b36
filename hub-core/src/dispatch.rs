//! Pushes an approved task onto an agent's live connection, if it has one (§4.4, §4.5).
//!
//! Shared by the gateway's connect-time backlog flush and by C6 immediately after an approval
//! decision, so both paths apply the exact same "send, then advance state" sequencing.

use crate::registry::Registry;
use crate::task_store::TaskStore;
use crate::models::Task;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hub_protocol::hub::TaskFrame;
use hub_protocol::HubMessage;
use tracing::warn;

/// Sends `task` to its `to` agent if currently connected, removing it from the backlog and
/// advancing it to `running` only once the send actually succeeds. Returns whether it was sent.
pub async fn dispatch_task(registry: &Registry, tasks: &TaskStore, task: &Task) -> bool {
    let attachments = to_wire_attachments(tasks.take_attachments(&task.task_id).await);
    let frame = HubMessage::Task(TaskFrame {
        task_id: task.task_id.clone(),
        from: task.from.clone(),
        content: task.content.clone(),
        chat_id: task.chat_id,
        message_id: task.message_id,
        conversation_id: Some(task.conversation_id.clone()),
        parent_task_id: task.parent_task_id.clone(),
        attachments,
    });

    if registry.send_to(&task.to, frame).await {
        tasks.remove_pending(&task.to, &task.task_id).await;
        if let Err(e) = tasks.update_status(&task.task_id, hub_protocol::TaskStatus::Running, None).await {
            warn!(task_id = %task.task_id, error = %e, "failed to advance task to running after dispatch");
        }
        true
    } else {
        false
    }
}

fn to_wire_attachments(attachments: Option<Vec<crate::models::Attachment>>) -> Option<Vec<hub_protocol::Attachment>> {
    attachments.map(|items| {
        items
            .into_iter()
            .map(|a| hub_protocol::Attachment {
                filename: a.filename,
                mime_type: a.mime_type,
                data_base64: BASE64.encode(&a.bytes),
                size: a.size,
            })
            .collect()
    })
}
