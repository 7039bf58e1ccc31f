use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use courier_types::events::GatewayEvent;

use crate::registry::ConnectionRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a WebSocket whose user was already authenticated at the HTTP
/// upgrade layer. Registers the connection, relays pushes until either side
/// goes away, then unregisters before returning.
pub async fn handle_connection(
    socket: WebSocket,
    registry: ConnectionRegistry,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    // Ready goes out before registration so it precedes the first OnlineUsers.
    if send_event(&mut sender, &GatewayEvent::Ready { user_id })
        .await
        .is_err()
    {
        return;
    }

    let (conn_id, push_rx) = registry.register(user_id).await;

    run_connection_loop(sender, receiver, push_rx).await;

    registry.unregister(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut push_rx: mpsc::UnboundedReceiver<GatewayEvent>,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward pushes -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = push_rx.recv() => {
                    // None: this connection was replaced by a newer one.
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.close().await;
    });

    // The gateway is push-only; inbound frames only matter for liveness.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Text(text) => {
                    let preview: String = text.chars().take(200).collect();
                    warn!("Ignoring client text frame: {}", preview);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        warn!("Failed to encode gateway event: {}", e);
    })?;

    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| ())
}
