//! TaskRepo: task upsert/update, backlog save/remove, load-all, find_recent (§4.1, §6).

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use hub_protocol::TaskStatus;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub from_user: String,
    pub to_agent: String,
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

pub struct TaskRepo {
    db: Arc<Mutex<Connection>>,
}

impl TaskRepo {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Inserts a new task row. Callers must persist the task before the dependent backlog row
    /// (see `save_backlog`) to respect the foreign-key discipline in §4.1.
    pub async fn upsert(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let db = self.db.clone();
        let task = task.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.execute(
                "INSERT INTO tasks (task_id, from_user, to_agent, content, status, result, created_at,
                                    completed_at, chat_id, message_id, conversation_id, parent_task_id,
                                    result_message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(task_id) DO UPDATE SET
                    status = excluded.status,
                    result = excluded.result,
                    completed_at = excluded.completed_at,
                    chat_id = excluded.chat_id,
                    message_id = excluded.message_id,
                    result_message_id = excluded.result_message_id",
                rusqlite::params![
                    task.task_id,
                    task.from_user,
                    task.to_agent,
                    task.content,
                    task.status.to_string(),
                    task.result,
                    task.created_at.to_rfc3339(),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    task.chat_id,
                    task.message_id,
                    task.conversation_id,
                    task.parent_task_id,
                    task.result_message_id,
                ],
            )?;
            Ok(())
        })
    }

    pub async fn update_chat_info(&self, task_id: &str, chat_id: i64, message_id: i64) -> Result<(), StoreError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.execute(
                "UPDATE tasks SET chat_id = ?1, message_id = ?2 WHERE task_id = ?3",
                rusqlite::params![chat_id, message_id, task_id],
            )?;
            Ok(())
        })
    }

    pub async fn set_result_message(&self, task_id: &str, message_id: i64) -> Result<(), StoreError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.execute(
                "UPDATE tasks SET result_message_id = ?1 WHERE task_id = ?2",
                rusqlite::params![message_id, task_id],
            )?;
            Ok(())
        })
    }

    pub async fn find_by_result_message(&self, message_id: i64) -> Result<Option<TaskRecord>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.query_row(
                &format!("{SELECT_COLS} WHERE result_message_id = ?1"),
                [message_id],
                row_to_task,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Backlog append: `(agent_name, task_id, position)`. Position is `max(position)+1`.
    pub async fn save_backlog(&self, agent_name: &str, task_id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let agent_name = agent_name.to_string();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            let next_position: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(position), 0) + 1 FROM pending_tasks WHERE agent_name = ?1",
                    [&agent_name],
                    |row| row.get(0),
                )
                .unwrap_or(1);
            conn.execute(
                "INSERT OR IGNORE INTO pending_tasks (agent_name, task_id, position) VALUES (?1, ?2, ?3)",
                rusqlite::params![agent_name, task_id, next_position],
            )?;
            Ok(())
        })
    }

    pub async fn remove_backlog(&self, agent_name: &str, task_id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let agent_name = agent_name.to_string();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.execute(
                "DELETE FROM pending_tasks WHERE agent_name = ?1 AND task_id = ?2",
                rusqlite::params![agent_name, task_id],
            )?;
            Ok(())
        })
    }

    /// Backlog snapshot in insertion order.
    pub async fn pending_for(&self, agent_name: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let db = self.db.clone();
        let agent_name = agent_name.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLS_JOIN_PENDING} WHERE pending_tasks.agent_name = ?1 ORDER BY pending_tasks.position ASC"
            ))?;
            let rows = stmt.query_map([agent_name], row_to_task)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// All non-terminal tasks, reloaded on startup (§4.8).
    pub async fn load_non_terminal(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLS} WHERE status NOT IN ('completed', 'failed', 'rejected', 'cancelled')"
            ))?;
            let rows = stmt.query_map([], row_to_task)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Ordered by `created_at` then `task_id` for stability across persistence round-trips (§4.3).
    pub async fn by_conversation(&self, conversation_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let db = self.db.clone();
        let conversation_id = conversation_id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLS} WHERE conversation_id = ?1 ORDER BY created_at ASC, task_id ASC"
            ))?;
            let rows = stmt.query_map([conversation_id], row_to_task)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    pub async fn find_recent(&self, agent: Option<&str>, limit: u32) -> Result<Vec<TaskRecord>, StoreError> {
        let limit = limit.min(20);
        let db = self.db.clone();
        let agent = agent.map(str::to_string);
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            match agent {
                Some(agent) => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_COLS} WHERE to_agent = ?1 ORDER BY created_at DESC LIMIT ?2"
                    ))?;
                    let rows = stmt.query_map(rusqlite::params![agent, limit], row_to_task)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
                }
                None => {
                    let mut stmt =
                        conn.prepare(&format!("{SELECT_COLS} ORDER BY created_at DESC LIMIT ?1"))?;
                    let rows = stmt.query_map([limit], row_to_task)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
                }
            }
        })
    }
}

const SELECT_COLS: &str = "SELECT task_id, from_user, to_agent, content, status, result, created_at, \
     completed_at, chat_id, message_id, conversation_id, parent_task_id, result_message_id FROM tasks";

const SELECT_COLS_JOIN_PENDING: &str = "SELECT tasks.task_id, tasks.from_user, tasks.to_agent, tasks.content, \
     tasks.status, tasks.result, tasks.created_at, tasks.completed_at, tasks.chat_id, tasks.message_id, \
     tasks.conversation_id, tasks.parent_task_id, tasks.result_message_id \
     FROM pending_tasks JOIN tasks ON tasks.task_id = pending_tasks.task_id";

fn parse_status(raw: &str) -> TaskStatus {
    match raw {
        "pending" => TaskStatus::Pending,
        "awaiting_approval" => TaskStatus::AwaitingApproval,
        "approved" => TaskStatus::Approved,
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "rejected" => TaskStatus::Rejected,
        _ => TaskStatus::Cancelled,
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status_raw: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let completed_at: Option<String> = row.get(7)?;
    Ok(TaskRecord {
        task_id: row.get(0)?,
        from_user: row.get(1)?,
        to_agent: row.get(2)?,
        content: row.get(3)?,
        status: parse_status(&status_raw),
        result: row.get(5)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        completed_at: completed_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))),
        chat_id: row.get(8)?,
        message_id: row.get(9)?,
        conversation_id: row.get(10)?,
        parent_task_id: row.get(11)?,
        result_message_id: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;
    use uuid::Uuid;

    fn repo() -> TaskRepo {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        TaskRepo::new(Arc::new(Mutex::new(conn)))
    }

    fn sample(to_agent: &str, conversation_id: &str) -> TaskRecord {
        TaskRecord {
            task_id: Uuid::new_v4().to_string(),
            from_user: "bob".into(),
            to_agent: to_agent.into(),
            content: "ping".into(),
            status: TaskStatus::Pending,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
            chat_id: 42,
            message_id: 7,
            conversation_id: conversation_id.into(),
            parent_task_id: None,
            result_message_id: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_load_non_terminal() {
        let repo = repo();
        let task = sample("alice", "c1");
        repo.upsert(&task).await.unwrap();
        let loaded = repo.load_non_terminal().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].task_id, task.task_id);
    }

    #[tokio::test]
    async fn terminal_tasks_excluded_from_non_terminal() {
        let repo = repo();
        let mut task = sample("alice", "c1");
        task.status = TaskStatus::Completed;
        repo.upsert(&task).await.unwrap();
        assert!(repo.load_non_terminal().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn backlog_is_insertion_ordered() {
        let repo = repo();
        let t1 = sample("alice", "c1");
        let t2 = sample("alice", "c2");
        repo.upsert(&t1).await.unwrap();
        repo.upsert(&t2).await.unwrap();
        repo.save_backlog("alice", &t1.task_id).await.unwrap();
        repo.save_backlog("alice", &t2.task_id).await.unwrap();

        let pending = repo.pending_for("alice").await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].task_id, t1.task_id);
        assert_eq!(pending[1].task_id, t2.task_id);

        repo.remove_backlog("alice", &t1.task_id).await.unwrap();
        let pending = repo.pending_for("alice").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, t2.task_id);
    }

    #[tokio::test]
    async fn by_conversation_is_stable_order() {
        let repo = repo();
        let t1 = sample("alice", "conv-x");
        let mut t2 = sample("alice", "conv-x");
        t2.parent_task_id = Some(t1.task_id.clone());
        repo.upsert(&t1).await.unwrap();
        repo.upsert(&t2).await.unwrap();

        let chain = repo.by_conversation("conv-x").await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].parent_task_id.as_deref(), Some(chain[0].task_id.as_str()));
    }

    #[tokio::test]
    async fn find_recent_filters_by_agent_and_caps_limit() {
        let repo = repo();
        for _ in 0..3 {
            repo.upsert(&sample("alice", "c")).await.unwrap();
        }
        repo.upsert(&sample("bob", "c")).await.unwrap();

        let recent = repo.find_recent(Some("alice"), 100).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|t| t.to_agent == "alice"));
    }
}
