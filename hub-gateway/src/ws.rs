//! Connection gateway (C5): registration handshake, heartbeat, backlog delivery (§4.4).
//!
//! One task per connection owns both halves of the split socket. Outbound frames — whether
//! pushed by another part of the hub via `Registry::send_to` or produced by this connection's
//! own demux replies — all funnel through the same `mpsc` channel, so a single `select!` loop
//! is the only writer and ordering against this connection's own traffic is preserved.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hub_core::ConnectionHandle;
use hub_protocol::agent::RegisterRequest;
use hub_protocol::hub::{PingFrame, RegisterAck};
use hub_protocol::{AgentMessage, HubMessage, TaskStatus};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::demux;
use crate::state::AppState;

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let Some(agent_name) = await_registration(&mut sink, &mut stream, &state).await else {
        let _ = sink.close().await;
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (evict_tx, mut evict_rx) = oneshot::channel();
    state.registry.register(&agent_name, ConnectionHandle { sender: tx, evict: evict_tx }).await;

    info!(agent = %agent_name, "agent registered");
    if let Some(callbacks) = state.callbacks() {
        callbacks.on_agent_online(&agent_name).await;
    }

    deliver_backlog(&state, &agent_name).await;

    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval);
    heartbeat.tick().await; // first tick is immediate; skip it so the first ping lands one interval out
    let stale_after_ms =
        (state.config.heartbeat_interval * state.config.missed_heartbeats_before_dead).as_millis() as i64;

    loop {
        tokio::select! {
            _ = &mut evict_rx => {
                info!(agent = %agent_name, "connection evicted by newer registration");
                break;
            }
            _ = heartbeat.tick() => {
                let dead = state.registry.dead_connections(stale_after_ms).await;
                if dead.iter().any(|name| name == &agent_name) {
                    warn!(agent = %agent_name, "missed heartbeats, closing connection");
                    break;
                }
                if sink.send(to_ws_message(&HubMessage::Ping(PingFrame {}))).await.is_err() {
                    break;
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if sink.send(to_ws_message(&message)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<AgentMessage>(&text) {
                        Ok(message) => demux::dispatch(&state, &agent_name, message).await,
                        Err(e) => warn!(agent = %agent_name, error = %e, "malformed frame, dropped"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(agent = %agent_name, error = %e, "read error, closing connection");
                        break;
                    }
                }
            }
        }
    }

    state.registry.unregister(&agent_name).await;
    state.status_cache.remove(&agent_name).await;
    if let Some(callbacks) = state.callbacks() {
        callbacks.on_agent_offline(&agent_name).await;
    }
}

/// Reads frames until a valid `register` arrives; anything else before that is dropped
/// silently (§4.4: "the only accepted first message is register"). An invalid register
/// gets a failing ack and the caller closes the socket.
async fn await_registration(
    sink: &mut SplitSink<WebSocket, Message>,
    stream: &mut SplitStream<WebSocket>,
    state: &Arc<AppState>,
) -> Option<String> {
    while let Some(received) = stream.next().await {
        let Ok(Message::Text(text)) = received else { continue };
        let Ok(AgentMessage::Register(RegisterRequest { agent_name, token })) =
            serde_json::from_str::<AgentMessage>(&text)
        else {
            continue;
        };

        if state.registry.validate(&agent_name, &token).await {
            let ack = HubMessage::RegisterAck(RegisterAck { success: true, error: None });
            if sink.send(to_ws_message(&ack)).await.is_err() {
                return None;
            }
            return Some(agent_name);
        }

        warn!(agent_name, "registration rejected: invalid credentials");
        let ack = HubMessage::RegisterAck(RegisterAck {
            success: false,
            error: Some("invalid credentials".to_string()),
        });
        let _ = sink.send(to_ws_message(&ack)).await;
        return None;
    }
    None
}

/// Walks this agent's backlog in insertion order, dropping terminal entries, leaving
/// not-yet-approved entries in place, and dispatching approved ones (§4.4 "Backlog delivery").
async fn deliver_backlog(state: &Arc<AppState>, agent_name: &str) {
    for task in state.tasks.pending_for(agent_name).await {
        if task.status.is_terminal() {
            state.tasks.remove_pending(agent_name, &task.task_id).await;
            continue;
        }
        if task.status != TaskStatus::Approved {
            continue;
        }
        hub_core::dispatch_task(&state.registry, &state.tasks, &task).await;
    }
}

fn to_ws_message(message: &HubMessage) -> Message {
    Message::Text(serde_json::to_string(message).expect("HubMessage always serializes"))
}
