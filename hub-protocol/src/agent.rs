//! Agent -> hub frames (§6).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent_name: String,
    pub token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PongFrame {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultOutcome {
    Success,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResultFrame {
    pub task_id: String,
    pub result: String,
    pub status: ResultOutcome,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskCancelledFrame {
    pub task_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskProgressFrame {
    pub task_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusReportFrame {
    pub running_tasks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_since: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListAgentsRequest {
    pub request_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStatusRequest {
    pub request_id: String,
    pub task_id: String,
}

/// Reserved; no-op in the current core (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendMessageFrame {
    pub target_agent: String,
    pub content: String,
}

/// Agent-to-hub frame envelope. Each variant maps to `{"type": "<variant>"}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Register(RegisterRequest),
    Pong(PongFrame),
    TaskResult(TaskResultFrame),
    TaskCancelled(TaskCancelledFrame),
    TaskProgress(TaskProgressFrame),
    StatusReport(StatusReportFrame),
    ListAgents(ListAgentsRequest),
    TaskStatus(TaskStatusRequest),
    SendMessage(SendMessageFrame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_roundtrip() {
        let msg = AgentMessage::Register(RegisterRequest {
            agent_name: "alice".to_string(),
            token: "agt_abc".to_string(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"register\""));
        assert!(json.contains("\"agent_name\":\"alice\""));
        let parsed: AgentMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, AgentMessage::Register(_)));
    }

    #[test]
    fn task_result_roundtrip() {
        let msg = AgentMessage::TaskResult(TaskResultFrame {
            task_id: "t1".to_string(),
            result: "pong".to_string(),
            status: ResultOutcome::Success,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"task_result\""));
        assert!(json.contains("\"status\":\"success\""));
        let parsed: AgentMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            AgentMessage::TaskResult(f) => {
                assert_eq!(f.task_id, "t1");
                assert_eq!(f.status, ResultOutcome::Success);
            }
            _ => panic!("expected task_result"),
        }
    }

    #[test]
    fn unknown_type_is_rejected_not_panicking() {
        let json = r#"{"type":"bogus_frame"}"#;
        let parsed: Result<AgentMessage, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn task_progress_optional_detail_omitted() {
        let msg = AgentMessage::TaskProgress(TaskProgressFrame {
            task_id: "t1".to_string(),
            status: "thinking".to_string(),
            detail: None,
            elapsed_ms: 120,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("detail"));
    }
}
