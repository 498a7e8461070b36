//! Axum app: middleware stack and route table for C5/C7 (§4.4, §4.7).

use axum::{
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, State},
    http::{header, Method},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::auth_middleware;
use crate::http;
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;
use crate::ws::handle_socket;

pub fn router(state: Arc<AppState>) -> Router {
    // Rate limiting is scoped to the task-submit route only (§4.7); `route_layer` applies to
    // the routes already registered in this builder, not the ones added after it.
    let api = Router::new()
        .route("/tasks", post(http::create_task))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .route("/tasks/:task_id", get(http::get_task))
        .route("/agents", get(http::list_agents))
        // Auth wraps the whole /api surface and must run before the rate limiter above, since
        // the limiter keys off the identity auth extracts.
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // No configured allow-list of origins exists in this hub's environment surface (§6), so
    // origin stays open; methods and headers are restricted to what the API actually accepts.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(http::health))
        .route("/webhook", post(http::webhook))
        .route("/ws", get(ws_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
