//! Storage error taxonomy (maps to the TransientIOError / FatalError kinds at call sites).

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("file fallback io: {0}")]
    Io(#[from] std::io::Error),
    #[error("file fallback serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("lock poisoned")]
    Lock,
}
