//! Shared state handed to both the WebSocket gateway (C5) and the HTTP API (C7).

use crate::callbacks::ChatCallbacks;
use crate::rate_limit::KeyedRateLimiter;
use hub_core::{AgentStatusCache, Registry, TaskStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub heartbeat_interval: Duration,
    pub missed_heartbeats_before_dead: u32,
    pub request_reply_timeout: Duration,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    pub max_body_bytes: usize,
    pub default_chat_id: Option<i64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            missed_heartbeats_before_dead: 2,
            request_reply_timeout: Duration::from_secs(15),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 30,
            max_body_bytes: 1024 * 1024,
            default_chat_id: None,
        }
    }
}

/// Pending `list_agents`/`task_status` request-reply correlations, keyed by `request_id` (§5).
pub type PendingReplies = Mutex<HashMap<String, tokio::sync::oneshot::Sender<serde_json::Value>>>;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub tasks: Arc<TaskStore>,
    pub status_cache: Arc<AgentStatusCache>,
    pub config: GatewayConfig,
    pub pending_replies: PendingReplies,
    pub rate_limiter: KeyedRateLimiter,
    /// Set exactly once during startup, before the listener starts accepting connections
    /// (§4.8). A `OnceCell` rather than a mutable global keeps the dependency explicit while
    /// still letting C6 be constructed after C5, as the lifecycle requires.
    pub callbacks: OnceCell<Arc<dyn ChatCallbacks>>,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        tasks: Arc<TaskStore>,
        status_cache: Arc<AgentStatusCache>,
        config: GatewayConfig,
    ) -> Self {
        let rate_limiter = KeyedRateLimiter::new(config.rate_limit_window, config.rate_limit_max_requests);
        Self {
            registry,
            tasks,
            status_cache,
            config,
            pending_replies: Mutex::new(HashMap::new()),
            rate_limiter,
            callbacks: OnceCell::new(),
        }
    }

    pub fn set_callbacks(&self, callbacks: Arc<dyn ChatCallbacks>) {
        let _ = self.callbacks.set(callbacks);
    }

    pub fn callbacks(&self) -> Option<&Arc<dyn ChatCallbacks>> {
        self.callbacks.get()
    }
}
