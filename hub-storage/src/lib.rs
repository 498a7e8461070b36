//! Persistence layer (C1): SQLite-backed repositories plus a JSON file-fallback credential
//! store for deployments with no configured database.

mod credentials;
mod error;
mod file_fallback;
mod migrations;
mod panels;
mod tasks;

pub use credentials::{generate_token, CredentialRecord, CredentialRepo};
pub use error::StoreError;
pub use file_fallback::FileCredentialStore;
pub use panels::{PanelPointer, PanelRepo};
pub use tasks::{TaskRecord, TaskRepo};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Opens (or creates) the SQLite database at `path`, runs migrations, and returns the
/// repositories C2/C3/C1 build on top of (§4.1, §4.8).
pub struct Persistence {
    pub credentials: CredentialRepo,
    pub tasks: TaskRepo,
    pub panels: PanelRepo,
}

impl Persistence {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut conn = Connection::open(path.as_ref())?;
        migrations::run(&mut conn)?;
        let db = Arc::new(Mutex::new(conn));
        Ok(Self {
            credentials: CredentialRepo::new(db.clone()),
            tasks: TaskRepo::new(db.clone()),
            panels: PanelRepo::new(db),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run(&mut conn)?;
        let db = Arc::new(Mutex::new(conn));
        Ok(Self {
            credentials: CredentialRepo::new(db.clone()),
            tasks: TaskRepo::new(db.clone()),
            panels: PanelRepo::new(db),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_runs_migrations_and_is_usable() {
        let p = Persistence::open_in_memory().unwrap();
        assert!(p.credentials.load_all().await.unwrap().is_empty());
    }
}
