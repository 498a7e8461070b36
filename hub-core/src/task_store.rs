//! Task store (C3): creation, status transitions, backlog, conversation index (§4.3).
//! In-memory state is authoritative; persistence is dispatched after the mutation (§5).

use crate::error::HubError;
use crate::models::{Attachment, CreateTaskParams, Task};
use crate::state_machine;
use chrono::{DateTime, Utc};
use hub_protocol::TaskStatus;
use hub_storage::{TaskRecord, TaskRepo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

struct ConversationState {
    turn_count: u32,
    last_active_at: DateTime<Utc>,
    closed: bool,
}

/// Invoked by the idle sweeper with the last task of a conversation it just closed.
pub type ConversationClosedCallback = Box<dyn Fn(Task) + Send + Sync>;

/// Result of [`TaskStore::update_status`]. `applied` is `false` only for the idempotent
/// repeated-terminal-transition case (§7) — callers must not double-count or double-notify
/// on that case. Derefs to the resulting [`Task`] so most callers can ignore the distinction.
pub struct StatusUpdate {
    pub task: Task,
    pub applied: bool,
}

impl std::ops::Deref for StatusUpdate {
    type Target = Task;
    fn deref(&self) -> &Task {
        &self.task
    }
}

pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    backlog: RwLock<HashMap<String, Vec<String>>>,
    conversations: RwLock<HashMap<String, ConversationState>>,
    result_message_index: RwLock<HashMap<i64, String>>,
    attachments: RwLock<HashMap<String, Vec<Attachment>>>,
    /// `None` in file-fallback deployments: tasks are in-memory only (§4.1).
    storage: Option<Arc<TaskRepo>>,
}

impl TaskStore {
    pub fn new(storage: Option<Arc<TaskRepo>>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            backlog: RwLock::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
            result_message_index: RwLock::new(HashMap::new()),
            attachments: RwLock::new(HashMap::new()),
            storage,
        }
    }

    /// Reloads non-terminal tasks and rebuilds the backlog from them (§4.8 startup).
    pub async fn reload_non_terminal(&self) -> Result<(), HubError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let records = storage.load_non_terminal().await?;
        let mut tasks = self.tasks.write().await;
        let mut backlog = self.backlog.write().await;
        let mut conversations = self.conversations.write().await;
        let mut by_conversation: HashMap<String, Vec<(DateTime<Utc>, String)>> = HashMap::new();
        for record in records {
            let task = from_record(&record);
            by_conversation
                .entry(task.conversation_id.clone())
                .or_default()
                .push((task.created_at, task.task_id.clone()));
            backlog.entry(task.to.clone()).or_default().push(task.task_id.clone());
            if let Some(message_id) = task.result_message_id {
                self.result_message_index.write().await.insert(message_id, task.task_id.clone());
            }
            tasks.insert(task.task_id.clone(), task);
        }
        for (conversation_id, mut entries) in by_conversation {
            entries.sort_by_key(|(created_at, _)| *created_at);
            let last_active_at = entries.last().map(|(t, _)| *t).unwrap_or_else(Utc::now);
            conversations.insert(
                conversation_id,
                ConversationState { turn_count: entries.len() as u32, last_active_at, closed: false },
            );
        }
        Ok(())
    }

    pub async fn create_task(&self, params: CreateTaskParams) -> Task {
        let task_id = Uuid::new_v4().to_string();
        let conversation_id = params.conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let task = Task {
            task_id: task_id.clone(),
            from: params.from,
            to: params.to.clone(),
            content: params.content,
            status: TaskStatus::Pending,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
            chat_id: params.chat_id,
            message_id: params.message_id,
            conversation_id: conversation_id.clone(),
            parent_task_id: params.parent_task_id,
            result_message_id: None,
        };

        self.tasks.write().await.insert(task_id.clone(), task.clone());
        self.backlog.write().await.entry(params.to.clone()).or_default().push(task_id.clone());
        self.touch_conversation(&conversation_id).await;

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.upsert(&to_record(&task)).await {
                warn!(task_id = %task.task_id, error = %e, "task persistence failed");
            } else if let Err(e) = storage.save_backlog(&params.to, &task_id).await {
                warn!(task_id = %task.task_id, error = %e, "backlog persistence failed");
            }
        }
        task
    }

    /// Validates the transition (§4.6) and persists on success. A repeated terminal transition
    /// is a no-op (§7 idempotence) rather than an error.
    pub async fn update_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        result: Option<String>,
    ) -> Result<StatusUpdate, HubError> {
        let (updated, applied) = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| HubError::Validation(format!("unknown task {task_id}")))?;

            if task.status == new_status && task.status.is_terminal() {
                return Ok(StatusUpdate { task: task.clone(), applied: false });
            }
            if !state_machine::is_permitted(task.status, new_status) {
                return Err(HubError::State(format!("{} -> {new_status} not permitted", task.status)));
            }

            task.status = new_status;
            if result.is_some() {
                task.result = result;
            }
            if new_status.is_terminal() {
                task.completed_at = Some(Utc::now());
            }
            (task.clone(), true)
        };

        if updated.status.is_terminal() {
            self.remove_pending(&updated.to, task_id).await;
            self.attachments.write().await.remove(task_id);
            self.touch_conversation(&updated.conversation_id).await;
        }

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.upsert(&to_record(&updated)).await {
                warn!(task_id, error = %e, "task status persistence failed");
            }
        }
        Ok(StatusUpdate { task: updated, applied })
    }

    pub async fn pending_for(&self, agent_name: &str) -> Vec<Task> {
        let backlog = self.backlog.read().await;
        let tasks = self.tasks.read().await;
        backlog
            .get(agent_name)
            .into_iter()
            .flatten()
            .filter_map(|id| tasks.get(id).cloned())
            .collect()
    }

    pub async fn remove_pending(&self, agent_name: &str, task_id: &str) {
        if let Some(list) = self.backlog.write().await.get_mut(agent_name) {
            list.retain(|id| id != task_id);
        }
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.remove_backlog(agent_name, task_id).await {
                warn!(agent_name, task_id, error = %e, "backlog removal persistence failed");
            }
        }
    }

    pub async fn by_conversation(&self, conversation_id: &str) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut result: Vec<Task> =
            tasks.values().filter(|t| t.conversation_id == conversation_id).cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.task_id.cmp(&b.task_id)));
        result
    }

    pub async fn find_by_result_message(&self, message_id: i64) -> Option<Task> {
        let task_id = self.result_message_index.read().await.get(&message_id).cloned()?;
        self.tasks.read().await.get(&task_id).cloned()
    }

    pub async fn set_result_message(&self, task_id: &str, message_id: i64) {
        if let Some(task) = self.tasks.write().await.get_mut(task_id) {
            task.result_message_id = Some(message_id);
        }
        self.result_message_index.write().await.insert(message_id, task_id.to_string());
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.set_result_message(task_id, message_id).await {
                warn!(task_id, error = %e, "result-message persistence failed");
            }
        }
    }

    pub async fn update_chat_info(&self, task_id: &str, chat_id: i64, message_id: i64) {
        if let Some(task) = self.tasks.write().await.get_mut(task_id) {
            task.chat_id = chat_id;
            task.message_id = message_id;
        }
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.update_chat_info(task_id, chat_id, message_id).await {
                warn!(task_id, error = %e, "chat-info persistence failed");
            }
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    pub async fn attach(&self, task_id: &str, attachments: Vec<Attachment>) {
        self.attachments.write().await.insert(task_id.to_string(), attachments);
    }

    pub async fn take_attachments(&self, task_id: &str) -> Option<Vec<Attachment>> {
        self.attachments.write().await.remove(task_id)
    }

    pub async fn find_recent(&self, agent: Option<&str>, limit: u32) -> Vec<Task> {
        let limit = limit.min(20) as usize;
        if let Some(storage) = &self.storage {
            match storage.find_recent(agent, limit as u32).await {
                Ok(records) => return records.iter().map(from_record).collect(),
                Err(e) => warn!(error = %e, "find_recent fell back to in-memory state"),
            }
        }
        let tasks = self.tasks.read().await;
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| agent.map(|a| a == t.to).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        matching
    }

    pub async fn close_conversation(&self, conversation_id: &str) {
        if let Some(state) = self.conversations.write().await.get_mut(conversation_id) {
            state.closed = true;
        }
    }

    pub async fn is_closed(&self, conversation_id: &str) -> bool {
        self.conversations.read().await.get(conversation_id).map(|s| s.closed).unwrap_or(false)
    }

    async fn touch_conversation(&self, conversation_id: &str) {
        let mut conversations = self.conversations.write().await;
        let state = conversations.entry(conversation_id.to_string()).or_insert_with(|| {
            ConversationState { turn_count: 0, last_active_at: Utc::now(), closed: false }
        });
        state.turn_count += 1;
        state.last_active_at = Utc::now();
    }

    /// Background sweeper: closes conversations idle past `idle_timeout`, invoking `on_close`
    /// with the last task of each one it closes (§4.3).
    pub fn spawn_idle_sweeper(
        self: Arc<Self>,
        tick: Duration,
        idle_timeout: Duration,
        on_close: Option<ConversationClosedCallback>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let idle_ids: Vec<String> = {
                    let now = Utc::now();
                    let conversations = self.conversations.read().await;
                    conversations
                        .iter()
                        .filter(|(_, state)| {
                            !state.closed
                                && now.signed_duration_since(state.last_active_at).to_std().unwrap_or_default()
                                    > idle_timeout
                        })
                        .map(|(id, _)| id.clone())
                        .collect()
                };
                for conversation_id in idle_ids {
                    self.close_conversation(&conversation_id).await;
                    if let Some(on_close) = &on_close {
                        let last = self.by_conversation(&conversation_id).await.into_iter().last();
                        if let Some(task) = last {
                            on_close(task);
                        }
                    }
                }
            }
        })
    }
}

fn to_record(task: &Task) -> TaskRecord {
    TaskRecord {
        task_id: task.task_id.clone(),
        from_user: task.from.clone(),
        to_agent: task.to.clone(),
        content: task.content.clone(),
        status: task.status,
        result: task.result.clone(),
        created_at: task.created_at,
        completed_at: task.completed_at,
        chat_id: task.chat_id,
        message_id: task.message_id,
        conversation_id: task.conversation_id.clone(),
        parent_task_id: task.parent_task_id.clone(),
        result_message_id: task.result_message_id,
    }
}

fn from_record(record: &TaskRecord) -> Task {
    Task {
        task_id: record.task_id.clone(),
        from: record.from_user.clone(),
        to: record.to_agent.clone(),
        content: record.content.clone(),
        status: record.status,
        result: record.result.clone(),
        created_at: record.created_at,
        completed_at: record.completed_at,
        chat_id: record.chat_id,
        message_id: record.message_id,
        conversation_id: record.conversation_id.clone(),
        parent_task_id: record.parent_task_id.clone(),
        result_message_id: record.result_message_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(to: &str) -> CreateTaskParams {
        CreateTaskParams {
            from: "bob".into(),
            to: to.into(),
            content: "ping".into(),
            chat_id: 42,
            message_id: 7,
            conversation_id: None,
            parent_task_id: None,
        }
    }

    #[tokio::test]
    async fn create_task_lands_in_backlog_as_pending() {
        let store = TaskStore::new(None);
        let task = store.create_task(params("alice")).await;
        assert_eq!(task.status, TaskStatus::Pending);
        let pending = store.pending_for("alice").await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, task.task_id);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = TaskStore::new(None);
        let task = store.create_task(params("alice")).await;
        let err = store.update_status(&task.task_id, TaskStatus::Running, None).await.unwrap_err();
        assert!(matches!(err, HubError::State(_)));
    }

    #[tokio::test]
    async fn terminal_transition_removes_from_backlog_and_clears_attachments() {
        let store = TaskStore::new(None);
        let task = store.create_task(params("alice")).await;
        store.attach(&task.task_id, vec![Attachment {
            filename: "a.txt".into(),
            mime_type: "text/plain".into(),
            bytes: vec![1, 2, 3],
            size: 3,
        }]).await;

        store.update_status(&task.task_id, TaskStatus::AwaitingApproval, None).await.unwrap();
        store.update_status(&task.task_id, TaskStatus::Approved, None).await.unwrap();
        store.update_status(&task.task_id, TaskStatus::Running, None).await.unwrap();
        store.update_status(&task.task_id, TaskStatus::Completed, Some("pong".into())).await.unwrap();

        assert!(store.pending_for("alice").await.is_empty());
        assert!(store.take_attachments(&task.task_id).await.is_none());
    }

    #[tokio::test]
    async fn repeated_terminal_transition_is_idempotent() {
        let store = TaskStore::new(None);
        let task = store.create_task(params("alice")).await;
        store.update_status(&task.task_id, TaskStatus::AwaitingApproval, None).await.unwrap();
        store.update_status(&task.task_id, TaskStatus::Approved, None).await.unwrap();
        store.update_status(&task.task_id, TaskStatus::Running, None).await.unwrap();
        let first = store.update_status(&task.task_id, TaskStatus::Completed, Some("pong".into())).await.unwrap();
        let second = store.update_status(&task.task_id, TaskStatus::Completed, Some("pong".into())).await.unwrap();
        assert_eq!(first.completed_at, second.completed_at);
        assert!(first.applied);
        assert!(!second.applied);
    }

    #[tokio::test]
    async fn conversation_chain_is_ordered_by_creation() {
        let store = TaskStore::new(None);
        let t1 = store.create_task(params("alice")).await;
        let mut continuation = params("alice");
        continuation.conversation_id = Some(t1.conversation_id.clone());
        continuation.parent_task_id = Some(t1.task_id.clone());
        let t2 = store.create_task(continuation).await;

        let chain = store.by_conversation(&t1.conversation_id).await;
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].task_id, t1.task_id);
        assert_eq!(chain[1].task_id, t2.task_id);
        assert_eq!(chain[1].parent_task_id.as_deref(), Some(t1.task_id.as_str()));
    }

    #[tokio::test]
    async fn find_by_result_message_resolves_continuation_anchor() {
        let store = TaskStore::new(None);
        let task = store.create_task(params("alice")).await;
        store.set_result_message(&task.task_id, 555).await;
        let found = store.find_by_result_message(555).await.unwrap();
        assert_eq!(found.task_id, task.task_id);
    }
}
