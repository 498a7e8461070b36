//! Local JSON credential store used when no database URL is configured (§4.1).
//!
//! `data/credentials.json` holding `{"credentials": [...]}`, file mode 0600, directory 0700.
//! Task data is never persisted in fallback mode; only credentials survive a restart.

use crate::credentials::CredentialRecord;
use crate::error::StoreError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct FileContents {
    credentials: Vec<CredentialRecord>,
}

pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes read-modify-write cycles; the file itself has no transactional guarantee.
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        harden_directory(dir)?;
        Ok(Self {
            path: dir.join("credentials.json"),
            lock: Mutex::new(()),
        })
    }

    pub fn upsert(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Lock)?;
        let mut contents = self.read_locked()?;
        contents.credentials.retain(|c| c.agent_name != record.agent_name);
        contents.credentials.push(record.clone());
        self.write_locked(&contents)
    }

    pub fn find_by_name(&self, agent_name: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Lock)?;
        Ok(self
            .read_locked()?
            .credentials
            .into_iter()
            .find(|c| c.agent_name == agent_name))
    }

    pub fn find_by_token(&self, token: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Lock)?;
        Ok(self
            .read_locked()?
            .credentials
            .into_iter()
            .find(|c| c.token == token))
    }

    pub fn find_by_owner(&self, owner_id: i64) -> Result<Option<CredentialRecord>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Lock)?;
        Ok(self
            .read_locked()?
            .credentials
            .into_iter()
            .find(|c| c.owner_id == owner_id))
    }

    pub fn delete(&self, agent_name: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Lock)?;
        let mut contents = self.read_locked()?;
        contents.credentials.retain(|c| c.agent_name != agent_name);
        self.write_locked(&contents)
    }

    pub fn load_all(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Lock)?;
        Ok(self.read_locked()?.credentials)
    }

    fn read_locked(&self) -> Result<FileContents, StoreError> {
        if !self.path.exists() {
            return Ok(FileContents::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(FileContents::default());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_locked(&self, contents: &FileContents) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(contents)?;
        std::fs::write(&self.path, raw)?;
        harden_file(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn harden_file(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn harden_file(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn harden_directory(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o700);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn harden_directory(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::generate_token;
    use chrono::Utc;

    fn record(name: &str, owner: i64) -> CredentialRecord {
        CredentialRecord {
            agent_name: name.into(),
            token: generate_token(),
            owner_id: owner,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_then_find_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        let rec = record("alice", 1);
        store.upsert(&rec).unwrap();
        let found = store.find_by_name("alice").unwrap().unwrap();
        assert_eq!(found.token, rec.token);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn file_and_directory_are_hardened() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        store.upsert(&record("bob", 2)).unwrap();

        let dir_mode = std::fs::metadata(dir.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        let file_mode = std::fs::metadata(dir.path().join("credentials.json"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
    }
}
