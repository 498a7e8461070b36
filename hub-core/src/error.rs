//! Error taxonomy (§7). Each kind maps to a caller-facing surface at the boundary that produced
//! it; this crate never decides the surface, only the kind.

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("auth: {0}")]
    Auth(String),
    #[error("transient io: {0}")]
    TransientIo(String),
    #[error("illegal state transition: {0}")]
    State(String),
    #[error("timeout waiting for reply")]
    Timeout,
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<hub_storage::StoreError> for HubError {
    fn from(e: hub_storage::StoreError) -> Self {
        // A storage failure on a read path during startup is fatal; on a write path during
        // normal operation callers are expected to log-and-swallow (§4.1) rather than propagate
        // this conversion, so this impl only covers the cases that do propagate.
        HubError::TransientIo(e.to_string())
    }
}
