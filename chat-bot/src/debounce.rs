//! Generic per-key debounce gate, shared by the online-notification, progress-message, and
//! status-panel update paths (§4.5), each with its own window.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct DebounceGate {
    window: Duration,
    last: RwLock<HashMap<String, Instant>>,
}

impl DebounceGate {
    pub fn new(window: Duration) -> Self {
        Self { window, last: RwLock::new(HashMap::new()) }
    }

    /// Returns whether `key` may fire now, recording the attempt either way is not done here:
    /// only a `true` result stamps `key`, so a still-debounced caller can retry immediately.
    pub async fn allow(&self, key: &str) -> bool {
        let mut last = self.last.write().await;
        let now = Instant::now();
        match last.get(key) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }

    pub async fn clear(&self, key: &str) {
        self.last.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_call_within_window_is_denied() {
        let gate = DebounceGate::new(Duration::from_millis(50));
        assert!(gate.allow("a").await);
        assert!(!gate.allow("a").await);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_interfere() {
        let gate = DebounceGate::new(Duration::from_millis(50));
        assert!(gate.allow("a").await);
        assert!(gate.allow("b").await);
    }

    #[tokio::test]
    async fn clear_resets_the_gate() {
        let gate = DebounceGate::new(Duration::from_millis(50));
        assert!(gate.allow("a").await);
        gate.clear("a").await;
        assert!(gate.allow("a").await);
    }
}
