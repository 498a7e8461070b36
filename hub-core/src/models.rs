//! In-memory domain types (§3). In-memory state is authoritative; persistence is a
//! write-behind mirror (§4.1, §5).

use chrono::{DateTime, Utc};
use hub_protocol::TaskStatus;
use tokio::sync::mpsc::UnboundedSender;

/// An in-flight attachment, never persisted (§3).
#[derive(Clone, Debug)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub size: usize,
}

#[derive(Clone, Debug)]
pub struct Task {
    pub task_id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub chat_id: i64,
    pub message_id: i64,
    pub conversation_id: String,
    pub parent_task_id: Option<String>,
    pub result_message_id: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct CreateTaskParams {
    pub from: String,
    pub to: String,
    pub content: String,
    pub chat_id: i64,
    pub message_id: i64,
    pub conversation_id: Option<String>,
    pub parent_task_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Credential {
    pub agent_name: String,
    pub token: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
}

/// The live half of a Connection (§3): a channel into the socket-writer task owned by the
/// gateway, plus a one-shot the gateway listens on to know it has been evicted by a newer
/// registration for the same name. Decoupling on channels, rather than holding the socket
/// itself, keeps this crate free of any transport dependency.
pub struct ConnectionHandle {
    pub sender: UnboundedSender<hub_protocol::HubMessage>,
    pub evict: tokio::sync::oneshot::Sender<()>,
}

#[derive(Clone, Debug)]
pub struct AgentInfo {
    pub name: String,
    pub online: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub owner_id: Option<i64>,
}
