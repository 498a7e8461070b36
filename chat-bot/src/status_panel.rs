//! Pinned per-chat status panel: a standing message summarizing every known agent (§4.5, §6).
//!
//! Rendering and pointer bookkeeping live here; the actual `edit_message_text`/`send_message`/
//! `pin_chat_message` calls stay in the adapter, which is the only module holding a `Bot`.

use crate::debounce::DebounceGate;
use hub_core::{AgentInfo, AgentStatus};
use hub_storage::{PanelPointer, PanelRepo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

const DEBOUNCE: Duration = Duration::from_secs(2);

pub struct PanelTracker {
    debounce: DebounceGate,
    pointers: RwLock<HashMap<i64, i64>>,
    repo: Option<Arc<PanelRepo>>,
}

impl PanelTracker {
    pub fn new(repo: Option<Arc<PanelRepo>>, initial: Vec<PanelPointer>) -> Self {
        let pointers = initial.into_iter().map(|p| (p.chat_id, p.message_id)).collect();
        Self { debounce: DebounceGate::new(DEBOUNCE), pointers: RwLock::new(pointers), repo }
    }

    pub async fn should_update(&self, chat_id: i64) -> bool {
        self.debounce.allow(&chat_id.to_string()).await
    }

    pub async fn pointer(&self, chat_id: i64) -> Option<i64> {
        self.pointers.read().await.get(&chat_id).copied()
    }

    /// Records a new panel message id, persisting it so a restart reloads the right pointer.
    pub async fn record(&self, chat_id: i64, message_id: i64) {
        self.pointers.write().await.insert(chat_id, message_id);
        if let Some(repo) = &self.repo {
            if let Err(e) = repo.upsert(chat_id, message_id).await {
                warn!(chat_id, error = %e, "status panel pointer persistence failed");
            }
        }
    }
}

/// Renders the full panel body: one line per known agent, newest-registered first is not
/// guaranteed — callers pass `agents` pre-sorted if a specific order matters.
pub fn render_panel(agents: &[AgentInfo], statuses: &HashMap<String, AgentStatus>) -> String {
    if agents.is_empty() {
        return "<b>Agents</b>\n<i>none registered</i>".to_string();
    }

    let mut lines = vec!["<b>Agents</b>".to_string()];
    for agent in agents {
        let dot = if agent.online { "🟢" } else { "⚪" };
        let status = statuses.get(&agent.name);
        let detail = match status {
            Some(s) if s.running_tasks > 0 => {
                format!("{} running (done {}, failed {})", s.running_tasks, s.completed_count, s.failed_count)
            }
            Some(s) => format!("idle (done {}, failed {})", s.completed_count, s.failed_count),
            None if agent.online => "idle".to_string(),
            None => "offline".to_string(),
        };
        lines.push(format!("{dot} <b>{}</b> — {detail}", crate::format::html_escape(&agent.name)));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn agent(name: &str, online: bool) -> AgentInfo {
        AgentInfo { name: name.to_string(), online, connected_at: Some(Utc::now()), last_seen: Some(Utc::now()), owner_id: Some(1) }
    }

    #[test]
    fn empty_registry_renders_placeholder() {
        let text = render_panel(&[], &HashMap::new());
        assert!(text.contains("none registered"));
    }

    #[test]
    fn online_agent_with_running_task_shows_count() {
        let mut statuses = HashMap::new();
        statuses.insert("alice".to_string(), AgentStatus { running_tasks: 1, current_task_id: None, idle_since: None, completed_count: 3, failed_count: 0 });
        let text = render_panel(&[agent("alice", true)], &statuses);
        assert!(text.contains("1 running"));
    }

    #[tokio::test]
    async fn second_update_within_window_is_suppressed() {
        let tracker = PanelTracker::new(None, vec![]);
        assert!(tracker.should_update(1).await);
        assert!(!tracker.should_update(1).await);
    }

    #[tokio::test]
    async fn pointer_reloads_from_initial_set() {
        let tracker = PanelTracker::new(None, vec![PanelPointer { chat_id: 7, message_id: 42 }]);
        assert_eq!(tracker.pointer(7).await, Some(42));
    }
}
