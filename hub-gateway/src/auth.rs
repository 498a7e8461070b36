//! Bearer auth middleware for `/api/*` (§4.7). Resolves the caller's `agent_name` via
//! `Registry::lookup_by_token` and stores it as a request extension for handlers to read.

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::state::AppState;

#[derive(Clone, Debug)]
pub struct CallerIdentity(pub String);

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        warn!(path = request.uri().path(), "missing bearer token");
        return Err(unauthorized());
    };

    match state.registry.lookup_by_token(token).await {
        Some(agent_name) => {
            request.extensions_mut().insert(CallerIdentity(agent_name));
            Ok(next.run(request).await)
        }
        None => {
            warn!(path = request.uri().path(), "invalid bearer token");
            Err(unauthorized())
        }
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response()
}
