//! Hub -> agent frames (§6).

use crate::attachment::Attachment;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingFrame {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskFrame {
    pub task_id: String,
    pub from: String,
    pub content: String,
    pub chat_id: i64,
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelTaskFrame {
    pub task_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub status: String,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListAgentsResponse {
    pub request_id: String,
    pub agents: Vec<AgentInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub request_id: String,
    pub task: Option<serde_json::Value>,
}

/// Hub-to-agent frame envelope. Each variant maps to `{"type": "<variant>"}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    RegisterAck(RegisterAck),
    Ping(PingFrame),
    Task(TaskFrame),
    CancelTask(CancelTaskFrame),
    ListAgentsResponse(ListAgentsResponse),
    TaskStatusResponse(TaskStatusResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_ack_failure_roundtrip() {
        let msg = HubMessage::RegisterAck(RegisterAck {
            success: false,
            error: Some("无效的 token".to_string()),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"register_ack\""));
        assert!(json.contains("\"success\":false"));
        let parsed: HubMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            HubMessage::RegisterAck(ack) => {
                assert!(!ack.success);
                assert_eq!(ack.error.as_deref(), Some("无效的 token"));
            }
            _ => panic!("expected register_ack"),
        }
    }

    #[test]
    fn task_frame_without_attachments_omits_field() {
        let msg = HubMessage::Task(TaskFrame {
            task_id: "t1".to_string(),
            from: "bob".to_string(),
            content: "ping".to_string(),
            chat_id: 42,
            message_id: 7,
            conversation_id: None,
            parent_task_id: None,
            attachments: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("attachments"));
        assert!(!json.contains("conversation_id"));
    }

    #[test]
    fn ping_roundtrip() {
        let msg = HubMessage::Ping(PingFrame {});
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }
}
