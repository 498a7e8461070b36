//! CredentialRepo: upsert, find-by-name, delete, load-all (§4.1, §6).

use crate::error::StoreError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Generates a fresh bearer token: `agt_` followed by 24 random bytes, base64url-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("agt_{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub agent_name: String,
    pub token: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
}

pub struct CredentialRepo {
    db: Arc<Mutex<Connection>>,
}

impl CredentialRepo {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Replaces any existing credential for `agent_name` atomically (old token invalidated).
    pub async fn upsert(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let db = self.db.clone();
        let record = record.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.execute(
                "INSERT INTO credentials (agent_name, token, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(agent_name) DO UPDATE SET token = excluded.token, owner_id = excluded.owner_id, created_at = excluded.created_at",
                rusqlite::params![
                    record.agent_name,
                    record.token,
                    record.owner_id,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub async fn find_by_name(&self, agent_name: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let db = self.db.clone();
        let agent_name = agent_name.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            query_one(&conn, "agent_name = ?1", &agent_name)
        })
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let db = self.db.clone();
        let token = token.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            query_one(&conn, "token = ?1", &token)
        })
    }

    pub async fn find_by_owner(&self, owner_id: i64) -> Result<Option<CredentialRecord>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            let mut stmt = conn.prepare(
                "SELECT agent_name, token, owner_id, created_at FROM credentials WHERE owner_id = ?1 LIMIT 1",
            )?;
            let mut rows = stmt.query_map([owner_id], row_to_credential)?;
            rows.next().transpose().map_err(StoreError::from)
        })
    }

    pub async fn delete(&self, agent_name: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let agent_name = agent_name.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            conn.execute("DELETE FROM credentials WHERE agent_name = ?1", [agent_name])?;
            Ok(())
        })
    }

    pub async fn load_all(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            let mut stmt =
                conn.prepare("SELECT agent_name, token, owner_id, created_at FROM credentials")?;
            let rows = stmt.query_map([], row_to_credential)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}

fn query_one(
    conn: &Connection,
    predicate: &str,
    value: &str,
) -> Result<Option<CredentialRecord>, StoreError> {
    let sql = format!("SELECT agent_name, token, owner_id, created_at FROM credentials WHERE {predicate}");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map([value], row_to_credential)?;
    rows.next().transpose().map_err(StoreError::from)
}

fn row_to_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialRecord> {
    let created_at: String = row.get(3)?;
    Ok(CredentialRecord {
        agent_name: row.get(0)?,
        token: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;

    fn repo() -> CredentialRepo {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        CredentialRepo::new(Arc::new(Mutex::new(conn)))
    }

    #[tokio::test]
    async fn upsert_then_find() {
        let repo = repo();
        let rec = CredentialRecord {
            agent_name: "alice".into(),
            token: generate_token(),
            owner_id: 99,
            created_at: Utc::now(),
        };
        repo.upsert(&rec).await.unwrap();
        let found = repo.find_by_name("alice").await.unwrap().unwrap();
        assert_eq!(found.token, rec.token);
        assert_eq!(found.owner_id, 99);
    }

    #[tokio::test]
    async fn upsert_replaces_old_token() {
        let repo = repo();
        let mut rec = CredentialRecord {
            agent_name: "bob".into(),
            token: generate_token(),
            owner_id: 1,
            created_at: Utc::now(),
        };
        repo.upsert(&rec).await.unwrap();
        let old_token = rec.token.clone();
        rec.token = generate_token();
        repo.upsert(&rec).await.unwrap();

        assert!(repo.find_by_token(&old_token).await.unwrap().is_none());
        assert!(repo.find_by_token(&rec.token).await.unwrap().is_some());
    }

    #[test]
    fn generated_tokens_are_prefixed_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert!(a.starts_with("agt_"));
        assert_ne!(a, b);
    }
}
