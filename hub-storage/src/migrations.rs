//! Startup migrations, gated by a `_migrations(name primary key)` ledger (§4.1, §6).
//!
//! Each migration runs at most once. The whole set runs inside a single transaction so a
//! partially-applied schema never reaches disk.

use crate::error::StoreError;
use rusqlite::Connection;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_credentials",
        sql: r#"
            CREATE TABLE credentials (
                agent_name TEXT PRIMARY KEY,
                token      TEXT NOT NULL UNIQUE,
                owner_id   INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        name: "0002_tasks",
        sql: r#"
            CREATE TABLE tasks (
                task_id           TEXT PRIMARY KEY,
                from_user         TEXT NOT NULL,
                to_agent          TEXT NOT NULL,
                content           TEXT NOT NULL,
                status            TEXT NOT NULL,
                result            TEXT,
                created_at        TEXT NOT NULL,
                completed_at      TEXT,
                chat_id           INTEGER NOT NULL,
                message_id        INTEGER NOT NULL,
                conversation_id   TEXT NOT NULL,
                parent_task_id    TEXT,
                result_message_id INTEGER
            );
            CREATE INDEX idx_tasks_conversation ON tasks(conversation_id);
            CREATE INDEX idx_tasks_to_agent ON tasks(to_agent);
            CREATE INDEX idx_tasks_result_message ON tasks(result_message_id);
        "#,
    },
    Migration {
        name: "0003_pending_tasks",
        sql: r#"
            CREATE TABLE pending_tasks (
                agent_name TEXT NOT NULL,
                task_id    TEXT NOT NULL REFERENCES tasks(task_id),
                position   INTEGER NOT NULL,
                PRIMARY KEY (agent_name, task_id)
            );
            CREATE INDEX idx_pending_tasks_agent ON pending_tasks(agent_name, position);
        "#,
    },
    Migration {
        name: "0004_status_panels",
        sql: r#"
            CREATE TABLE status_panels (
                chat_id    INTEGER PRIMARY KEY,
                message_id INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

pub fn run(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS _migrations (name TEXT PRIMARY KEY, applied_at TEXT NOT NULL)")?;

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        let already: bool = tx
            .query_row(
                "SELECT 1 FROM _migrations WHERE name = ?1",
                [migration.name],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if already {
            continue;
        }
        tx.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration(format!("{}: {e}", migration.name)))?;
        tx.execute(
            "INSERT INTO _migrations (name, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.name, chrono::Utc::now().to_rfc3339()],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_applied_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn creates_expected_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        for table in ["credentials", "tasks", "pending_tasks", "status_panels"] {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            assert!(exists, "missing table {table}");
        }
    }
}
