//! Agent-status cache (C4): per-agent running/idle counters fed by `status_report` and
//! `task_result` frames (§3, §4.4). Feeds the chat adapter's status panel.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Default)]
pub struct AgentStatus {
    pub running_tasks: u32,
    pub current_task_id: Option<String>,
    pub idle_since: Option<DateTime<Utc>>,
    pub completed_count: u64,
    pub failed_count: u64,
}

#[derive(Default)]
pub struct AgentStatusCache {
    entries: RwLock<HashMap<String, AgentStatus>>,
}

impl AgentStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update_from_report(
        &self,
        agent_name: &str,
        running_tasks: u32,
        current_task_id: Option<String>,
        idle_since: Option<DateTime<Utc>>,
    ) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(agent_name.to_string()).or_default();
        entry.running_tasks = running_tasks;
        entry.current_task_id = current_task_id;
        entry.idle_since = idle_since;
    }

    pub async fn record_completed(&self, agent_name: &str) {
        let mut entries = self.entries.write().await;
        entries.entry(agent_name.to_string()).or_default().completed_count += 1;
    }

    pub async fn record_failed(&self, agent_name: &str) {
        let mut entries = self.entries.write().await;
        entries.entry(agent_name.to_string()).or_default().failed_count += 1;
    }

    pub async fn snapshot(&self, agent_name: &str) -> Option<AgentStatus> {
        self.entries.read().await.get(agent_name).cloned()
    }

    pub async fn all(&self) -> HashMap<String, AgentStatus> {
        self.entries.read().await.clone()
    }

    pub async fn remove(&self, agent_name: &str) {
        self.entries.write().await.remove(agent_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_updates_snapshot() {
        let cache = AgentStatusCache::new();
        cache.update_from_report("alice", 2, Some("t1".into()), None).await;
        let snapshot = cache.snapshot("alice").await.unwrap();
        assert_eq!(snapshot.running_tasks, 2);
        assert_eq!(snapshot.current_task_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn completed_and_failed_counters_do_not_cross_contaminate() {
        let cache = AgentStatusCache::new();
        cache.record_completed("alice").await;
        cache.record_completed("alice").await;
        cache.record_failed("alice").await;
        let snapshot = cache.snapshot("alice").await.unwrap();
        assert_eq!(snapshot.completed_count, 2);
        assert_eq!(snapshot.failed_count, 1);
    }

    #[tokio::test]
    async fn second_terminal_report_for_same_task_does_not_double_count() {
        // Mirrors the terminal-idempotence property at the dispatcher layer: the cache itself
        // just counts what it's told, so the dispatcher must not call record_completed twice
        // for the same task_result. This test documents that contract at the call site.
        let cache = AgentStatusCache::new();
        cache.record_completed("alice").await;
        let snapshot = cache.snapshot("alice").await.unwrap();
        assert_eq!(snapshot.completed_count, 1);
    }
}
