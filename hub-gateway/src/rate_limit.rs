//! Sliding-window rate limiter for the task-submit endpoint, keyed per caller token (§4.7).
//!
//! The teacher pack's orchestrator used a single global `RateLimiter::direct`; a per-token
//! limit needs governor's keyed variant instead, so a caller hammering `/api/tasks` only
//! throttles itself.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use governor::{Quota, RateLimiter};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::auth::CallerIdentity;
use crate::state::AppState;

pub struct KeyedRateLimiter {
    limiter: RateLimiter<String, governor::state::keyed::DefaultKeyedStateStore<String>, governor::clock::DefaultClock>,
}

impl KeyedRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        let max_requests = NonZeroU32::new(max_requests.max(1)).expect("max_requests > 0");
        let period = window.checked_div(max_requests.get()).unwrap_or(window).max(Duration::from_millis(1));
        let quota = Quota::with_period(period).expect("nonzero period").allow_burst(max_requests);
        Self { limiter: RateLimiter::keyed(quota) }
    }

    pub fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let key = request
        .extensions()
        .get::<CallerIdentity>()
        .map(|c| c.0.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    if !state.rate_limiter.check(&key) {
        warn!(caller = %key, "rate limit exceeded");
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate limit exceeded"})),
        )
            .into_response());
    }
    Ok(next.run(request).await)
}
