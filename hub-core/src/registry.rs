//! Registry (C2): credential CRUD, connection table, token validation, name→owner lookup
//! (§4.2). In-memory state is authoritative; the configured [`CredentialStore`] is a
//! write-behind mirror whose failures are logged and swallowed (§4.1).

use crate::credential_store::CredentialStore;
use crate::models::{AgentInfo, ConnectionHandle, Credential};
use chrono::{DateTime, Utc};
use hub_protocol::HubMessage;
use hub_storage::CredentialRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::warn;

struct LiveConnection {
    handle: ConnectionHandle,
    connected_at: DateTime<Utc>,
    // Epoch milliseconds; atomics let heartbeat bookkeeping update this without taking the
    // connection-table lock (§5: "per-key updates may interleave freely" is the cache's rule,
    // but last_seen on an otherwise-stable entry is the same shape of problem).
    last_seen_ms: AtomicI64,
}

pub struct Registry {
    store: Arc<dyn CredentialStore>,
    credentials: RwLock<HashMap<String, Credential>>,
    token_index: RwLock<HashMap<String, String>>,
    connections: RwLock<HashMap<String, Arc<LiveConnection>>>,
}

impl Registry {
    /// Loads all credentials from `store` into memory. Read failure here is fatal (§4.1).
    pub async fn load(store: Arc<dyn CredentialStore>) -> Result<Self, hub_storage::StoreError> {
        let records = store.load_all().await?;
        let mut credentials = HashMap::new();
        let mut token_index = HashMap::new();
        for record in records {
            token_index.insert(record.token.clone(), record.agent_name.clone());
            credentials.insert(record.agent_name.clone(), to_credential(record));
        }
        Ok(Self {
            store,
            credentials: RwLock::new(credentials),
            token_index: RwLock::new(token_index),
            connections: RwLock::new(HashMap::new()),
        })
    }

    /// Generates a fresh token, atomically replacing any existing credential for `agent_name`.
    pub async fn issue_token(&self, agent_name: &str, owner_id: i64) -> String {
        let token = hub_storage::generate_token();
        let credential = Credential {
            agent_name: agent_name.to_string(),
            token: token.clone(),
            owner_id,
            created_at: Utc::now(),
        };

        {
            let mut credentials = self.credentials.write().await;
            let mut token_index = self.token_index.write().await;
            if let Some(old) = credentials.insert(agent_name.to_string(), credential.clone()) {
                token_index.remove(&old.token);
            }
            token_index.insert(token.clone(), agent_name.to_string());
        }

        if let Err(e) = self.store.upsert(&to_record(&credential)).await {
            warn!(agent_name, error = %e, "credential persistence failed, in-memory state remains authoritative");
        }
        token
    }

    /// Returns a new token only if `owner_id` matches the existing credential's owner.
    /// On success, evicts any live connection so the agent must reconnect with the new token.
    pub async fn refresh_token(&self, agent_name: &str, owner_id: i64) -> Option<String> {
        let matches = {
            let credentials = self.credentials.read().await;
            credentials.get(agent_name).map(|c| c.owner_id) == Some(owner_id)
        };
        if !matches {
            return None;
        }
        let token = self.issue_token(agent_name, owner_id).await;
        self.unregister(agent_name).await;
        Some(token)
    }

    /// Constant-time comparison against the stored token; false on length mismatch or
    /// missing credential (§4.2, §8).
    pub async fn validate(&self, agent_name: &str, token: &str) -> bool {
        let credentials = self.credentials.read().await;
        match credentials.get(agent_name) {
            Some(credential) => {
                let expected = credential.token.as_bytes();
                let provided = token.as_bytes();
                expected.len() == provided.len() && bool::from(expected.ct_eq(provided))
            }
            None => false,
        }
    }

    pub async fn lookup_by_token(&self, token: &str) -> Option<String> {
        self.token_index.read().await.get(token).cloned()
    }

    pub async fn find_credential_by_owner(&self, owner_id: i64) -> Option<Credential> {
        self.credentials
            .read()
            .await
            .values()
            .find(|c| c.owner_id == owner_id)
            .cloned()
    }

    /// The `owner_id` a registered agent name belongs to, if any (§4.5 dispatch flow).
    pub async fn credential_owner(&self, agent_name: &str) -> Option<i64> {
        self.credentials.read().await.get(agent_name).map(|c| c.owner_id)
    }

    /// Installs a live connection for `agent_name`, evicting any prior connection first
    /// (§4.2 invariant: a successful register for an already-connected name evicts the old one).
    /// The evicted connection's `evict` one-shot fires so its socket task can close cleanly.
    pub async fn register(&self, agent_name: &str, handle: ConnectionHandle) {
        let entry = Arc::new(LiveConnection {
            handle,
            connected_at: Utc::now(),
            last_seen_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        });
        let old = self.connections.write().await.insert(agent_name.to_string(), entry);
        if let Some(old) = old {
            if let Ok(old) = Arc::try_unwrap(old) {
                let _ = old.handle.evict.send(());
            }
        }
    }

    pub async fn unregister(&self, agent_name: &str) {
        self.connections.write().await.remove(agent_name);
    }

    pub async fn touch(&self, agent_name: &str) {
        if let Some(conn) = self.connections.read().await.get(agent_name) {
            conn.last_seen_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
    }

    pub async fn send_to(&self, agent_name: &str, message: HubMessage) -> bool {
        if let Some(conn) = self.connections.read().await.get(agent_name) {
            conn.handle.sender.send(message).is_ok()
        } else {
            false
        }
    }

    pub async fn is_online(&self, agent_name: &str) -> bool {
        self.connections.read().await.contains_key(agent_name)
    }

    pub async fn list_online(&self) -> Vec<AgentInfo> {
        let connections = self.connections.read().await;
        let credentials = self.credentials.read().await;
        connections
            .iter()
            .map(|(name, conn)| AgentInfo {
                name: name.clone(),
                online: true,
                connected_at: Some(conn.connected_at),
                last_seen: DateTime::from_timestamp_millis(conn.last_seen_ms.load(Ordering::Relaxed)),
                owner_id: credentials.get(name).map(|c| c.owner_id),
            })
            .collect()
    }

    /// Every known agent, online or not (§6 `GET /api/agents`).
    pub async fn list_all(&self) -> Vec<AgentInfo> {
        let credentials = self.credentials.read().await;
        let connections = self.connections.read().await;
        credentials
            .values()
            .map(|c| {
                let live = connections.get(&c.agent_name);
                AgentInfo {
                    name: c.agent_name.clone(),
                    online: live.is_some(),
                    connected_at: live.map(|conn| conn.connected_at),
                    last_seen: live.map(|conn| {
                        DateTime::from_timestamp_millis(conn.last_seen_ms.load(Ordering::Relaxed))
                            .unwrap_or(conn.connected_at)
                    }),
                    owner_id: Some(c.owner_id),
                }
            })
            .collect()
    }

    /// Connections that missed `threshold` consecutive heartbeats (§4.4, §5).
    pub async fn dead_connections(&self, stale_after_ms: i64) -> Vec<String> {
        let now = Utc::now().timestamp_millis();
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, conn)| now - conn.last_seen_ms.load(Ordering::Relaxed) > stale_after_ms)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn to_credential(record: CredentialRecord) -> Credential {
    Credential {
        agent_name: record.agent_name,
        token: record.token,
        owner_id: record.owner_id,
        created_at: record.created_at,
    }
}

fn to_record(credential: &Credential) -> CredentialRecord {
    CredentialRecord {
        agent_name: credential.agent_name.clone(),
        token: credential.token.clone(),
        owner_id: credential.owner_id,
        created_at: credential.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_storage::FileCredentialStore;

    async fn registry() -> Registry {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(dir.path()).unwrap());
        Registry::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn issue_then_validate_and_reverse_lookup() {
        let registry = registry().await;
        let token = registry.issue_token("alice", 7).await;
        assert!(registry.validate("alice", &token).await);
        assert!(!registry.validate("alice", "wrong").await);
        assert_eq!(registry.lookup_by_token(&token).await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn issuing_again_invalidates_old_token() {
        let registry = registry().await;
        let old = registry.issue_token("bob", 1).await;
        let new = registry.issue_token("bob", 1).await;
        assert!(!registry.validate("bob", &old).await);
        assert!(registry.validate("bob", &new).await);
        assert!(registry.lookup_by_token(&old).await.is_none());
    }

    #[tokio::test]
    async fn refresh_requires_matching_owner() {
        let registry = registry().await;
        registry.issue_token("carol", 5).await;
        assert!(registry.refresh_token("carol", 999).await.is_none());
        assert!(registry.refresh_token("carol", 5).await.is_some());
    }

    #[tokio::test]
    async fn register_evicts_prior_connection() {
        let registry = registry().await;
        registry.issue_token("dave", 1).await;
        let (tx1, _rx1) = tokio::sync::mpsc::unbounded_channel();
        let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
        let (evict1, evict1_rx) = tokio::sync::oneshot::channel();
        let (evict2, _evict2_rx) = tokio::sync::oneshot::channel();

        registry.register("dave", ConnectionHandle { sender: tx1, evict: evict1 }).await;
        assert!(registry.is_online("dave").await);
        registry.register("dave", ConnectionHandle { sender: tx2, evict: evict2 }).await;

        // The first connection's eviction one-shot fires so its socket task knows to close.
        assert!(evict1_rx.await.is_ok());
        assert!(registry.is_online("dave").await);
    }

    #[tokio::test]
    async fn validate_rejects_missing_credential() {
        let registry = registry().await;
        assert!(!registry.validate("ghost", "anything").await);
    }
}
