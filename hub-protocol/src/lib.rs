//! Wire protocol for the task routing hub.
//!
//! Two frame directions travel the WebSocket (§6 agent <-> hub protocol):
//! [`AgentMessage`] (agent -> hub) and [`HubMessage`] (hub -> agent). The HTTP API DTOs
//! live in [`http`]. Nothing here touches I/O; `hub-gateway` owns framing and transport.

pub mod agent;
pub mod attachment;
pub mod http;
pub mod hub;
pub mod status;

pub use agent::AgentMessage;
pub use attachment::Attachment;
pub use hub::HubMessage;
pub use status::TaskStatus;
