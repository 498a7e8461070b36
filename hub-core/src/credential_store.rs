//! Abstracts over the SQLite-backed and file-fallback credential repositories (§4.1) so
//! [`Registry`](crate::registry::Registry) doesn't care which one a deployment configured.

use async_trait::async_trait;
use hub_storage::{CredentialRecord, CredentialRepo, FileCredentialStore, StoreError};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn upsert(&self, record: &CredentialRecord) -> Result<(), StoreError>;
    async fn load_all(&self) -> Result<Vec<CredentialRecord>, StoreError>;
    async fn delete(&self, agent_name: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl CredentialStore for CredentialRepo {
    async fn upsert(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        CredentialRepo::upsert(self, record).await
    }

    async fn load_all(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        CredentialRepo::load_all(self).await
    }

    async fn delete(&self, agent_name: &str) -> Result<(), StoreError> {
        CredentialRepo::delete(self, agent_name).await
    }
}

/// The file store's operations are synchronous file I/O; `block_in_place` keeps them off the
/// async reactor thread the same way the SQLite repositories do.
#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn upsert(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let record = record.clone();
        tokio::task::block_in_place(|| FileCredentialStore::upsert(self, &record))
    }

    async fn load_all(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        tokio::task::block_in_place(|| FileCredentialStore::load_all(self))
    }

    async fn delete(&self, agent_name: &str) -> Result<(), StoreError> {
        let agent_name = agent_name.to_string();
        tokio::task::block_in_place(|| FileCredentialStore::delete(self, &agent_name))
    }
}
