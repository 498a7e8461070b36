//! Debounced in-place progress message per running task (§4.5 "Progress rendering").
//!
//! A `task_progress` frame arrives far more often than humans need to see it; this tracks one
//! slot per task and only lets an edit through every [`DEBOUNCE`].

use std::collections::HashMap;
use std::time::{Duration, Instant};
use teloxide::types::{ChatId, MessageId};
use tokio::sync::RwLock;

const DEBOUNCE: Duration = Duration::from_secs(3);

struct Slot {
    chat_id: ChatId,
    reply_to: MessageId,
    progress_message_id: Option<MessageId>,
    started_at: Instant,
    last_update_at: Instant,
}

pub struct ProgressSlot {
    pub chat_id: ChatId,
    pub reply_to: MessageId,
    pub progress_message_id: Option<MessageId>,
    pub elapsed: Duration,
}

#[derive(Default)]
pub struct ProgressTracker {
    slots: RwLock<HashMap<String, Slot>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a slot for a task that just started running. The first progress update always
    /// goes through regardless of debounce, since there is nothing on screen yet.
    pub async fn start(&self, task_id: &str, chat_id: ChatId, reply_to: MessageId) {
        let now = Instant::now();
        self.slots.write().await.insert(
            task_id.to_string(),
            Slot {
                chat_id,
                reply_to,
                progress_message_id: None,
                started_at: now,
                last_update_at: now - DEBOUNCE,
            },
        );
    }

    pub async fn exists(&self, task_id: &str) -> bool {
        self.slots.read().await.contains_key(task_id)
    }

    /// Returns the slot to render against if the debounce window has elapsed, else `None`.
    pub async fn try_update(&self, task_id: &str) -> Option<ProgressSlot> {
        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(task_id)?;
        let now = Instant::now();
        if now.duration_since(slot.last_update_at) < DEBOUNCE {
            return None;
        }
        slot.last_update_at = now;
        Some(ProgressSlot {
            chat_id: slot.chat_id,
            reply_to: slot.reply_to,
            progress_message_id: slot.progress_message_id,
            elapsed: now.duration_since(slot.started_at),
        })
    }

    pub async fn set_message_id(&self, task_id: &str, message_id: MessageId) {
        if let Some(slot) = self.slots.write().await.get_mut(task_id) {
            slot.progress_message_id = Some(message_id);
        }
    }

    /// Drops the slot, returning its last known location so the caller can delete the
    /// in-progress message once the task reaches a terminal status.
    pub async fn remove(&self, task_id: &str) -> Option<(ChatId, Option<MessageId>)> {
        self.slots.write().await.remove(task_id).map(|slot| (slot.chat_id, slot.progress_message_id))
    }
}

/// Renders a one-line progress label: a verb-phrase status plus elapsed time.
pub fn render_label(status: &str, detail: Option<&str>, elapsed: Duration) -> String {
    let phrase = match (status, detail) {
        ("tool_use", Some(name)) => format!("🔧 using {name}"),
        ("thinking", _) => "💭 thinking".to_string(),
        ("responding", _) => "✍️ responding".to_string(),
        (other, Some(detail)) => format!("⏳ {other}: {detail}"),
        (other, None) => format!("⏳ {other}"),
    };
    format!("{phrase} ({}s)", elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_update_is_always_allowed() {
        let tracker = ProgressTracker::new();
        tracker.start("t1", ChatId(1), MessageId(10)).await;
        assert!(tracker.try_update("t1").await.is_some());
    }

    #[tokio::test]
    async fn second_update_within_window_is_suppressed() {
        let tracker = ProgressTracker::new();
        tracker.start("t1", ChatId(1), MessageId(10)).await;
        tracker.try_update("t1").await;
        assert!(tracker.try_update("t1").await.is_none());
    }

    #[test]
    fn label_includes_tool_name() {
        let label = render_label("tool_use", Some("search"), Duration::from_secs(5));
        assert!(label.contains("search"));
        assert!(label.contains("5s"));
    }
}
