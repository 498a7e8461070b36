//! Domain state for the task hub: the registry (C2), task store (C3), and agent-status
//! cache (C4) that the gateway and chat adapter are built on top of.

mod credential_store;
mod dispatch;
mod error;
mod models;
mod registry;
mod state_machine;
mod status_cache;
mod task_store;

pub use credential_store::CredentialStore;
pub use dispatch::dispatch_task;
pub use error::HubError;
pub use models::{AgentInfo, Attachment, ConnectionHandle, CreateTaskParams, Credential, Task};
pub use registry::Registry;
pub use state_machine::is_permitted as is_transition_permitted;
pub use status_cache::{AgentStatus, AgentStatusCache};
pub use task_store::{ConversationClosedCallback, StatusUpdate, TaskStore};
