//! Panel pointer persistence: `chat_id -> message_id` of a pinned status panel (§3, §6).

use crate::error::StoreError;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug)]
pub struct PanelPointer {
    pub chat_id: i64,
    pub message_id: i64,
}

pub struct PanelRepo {
    db: Arc<Mutex<Connection>>,
}

impl PanelRepo {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub async fn upsert(&self, chat_id: i64, message_id: i64) -> Result<(), StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.execute(
                "INSERT INTO status_panels (chat_id, message_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(chat_id) DO UPDATE SET message_id = excluded.message_id, updated_at = excluded.updated_at",
                rusqlite::params![chat_id, message_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub async fn find(&self, chat_id: i64) -> Result<Option<PanelPointer>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.query_row(
                "SELECT chat_id, message_id FROM status_panels WHERE chat_id = ?1",
                [chat_id],
                |row| Ok(PanelPointer { chat_id: row.get(0)?, message_id: row.get(1)? }),
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub async fn load_all(&self) -> Result<Vec<PanelPointer>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            let mut stmt = conn.prepare("SELECT chat_id, message_id FROM status_panels")?;
            let rows = stmt.query_map([], |row| {
                Ok(PanelPointer { chat_id: row.get(0)?, message_id: row.get(1)? })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;

    fn repo() -> PanelRepo {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        PanelRepo::new(Arc::new(Mutex::new(conn)))
    }

    #[tokio::test]
    async fn upsert_then_find() {
        let repo = repo();
        repo.upsert(42, 100).await.unwrap();
        let found = repo.find(42).await.unwrap().unwrap();
        assert_eq!(found.message_id, 100);

        repo.upsert(42, 200).await.unwrap();
        let found = repo.find(42).await.unwrap().unwrap();
        assert_eq!(found.message_id, 200);
    }
}
