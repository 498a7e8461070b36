//! WebSocket connection gateway (C5) and HTTP API (C7) for the task hub.
//!
//! **Public API**: [`run_gateway_on_listener`], plus the building blocks ([`AppState`],
//! [`GatewayConfig`], [`ChatCallbacks`]) that C8 wires up before the listener starts (§4.8).

mod app;
mod auth;
mod callbacks;
mod demux;
mod http;
mod rate_limit;
mod state;
mod views;
mod ws;

pub use app::router;
pub use callbacks::ChatCallbacks;
pub use state::{AppState, GatewayConfig};

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serves the gateway on an already-bound listener until Ctrl-C resolves. Binding separately
/// from serving lets C8 log the resolved address and lets tests bind to `127.0.0.1:0`.
pub async fn run_gateway_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!(%addr, "gateway listening");
    let app = router(state);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
