//! The explicit dependency the chat adapter (C6) registers into the gateway at construction
//! time, in place of a process-wide callback singleton (§9 design notes).

use async_trait::async_trait;
use hub_core::Task;

#[async_trait]
pub trait ChatCallbacks: Send + Sync {
    async fn on_agent_online(&self, agent_name: &str);
    async fn on_agent_offline(&self, agent_name: &str);
    async fn on_task_progress(&self, task_id: &str, status: &str, detail: Option<String>, elapsed_ms: u64);
    async fn on_task_result(&self, task: Task);
    async fn on_task_cancelled(&self, task: Task);
    /// Called when C7 creates a task on behalf of an API caller (§4.5).
    async fn on_api_task_created(&self, task: Task, owner_id: Option<i64>);
    /// Forwards a raw platform webhook update for C6 to parse (§4.8: C6 owns the platform
    /// format, the gateway only owns the HTTP surface).
    async fn on_webhook_update(&self, update: serde_json::Value);
}
