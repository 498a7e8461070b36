use serde::{Deserialize, Serialize};

/// An inline attachment carried on a `task` frame (§3 Attachment, §9 design notes: small
/// inline payloads only, no side-channel upload).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    /// Base64-encoded file contents.
    pub data_base64: String,
    pub size: usize,
}

/// Hard ceiling on a single attachment's decoded size (§3).
pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;
