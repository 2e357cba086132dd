use super::AppState;
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

/// Time allowed to flush queued frames after the session ends
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Optional handshake parameters on the upgrade request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.ws_config.max_message_size)
        .on_upgrade(|socket| handle_socket(socket, state, params))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, params: ConnectParams) {
    let supervisor = Arc::clone(&state.supervisor);

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.ws_config.outbox_capacity);
    let mut session = supervisor.connect(tx.clone());
    let connection_id = session.connection_id;
    info!("New WebSocket connection: {}", connection_id);

    if let Some(user_id) = params.user_id.as_deref()
        && let Err(e) = supervisor.authenticate(&mut session, user_id)
    {
        warn!("Handshake identity rejected for {}: {}", connection_id, e);
    }

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward outgoing messages to WebSocket, interleaved with protocol pings
    let ping_interval = state.ws_config.ping_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(ping_interval);
        heartbeat.tick().await;

        loop {
            let frame = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    },
                    None => break,
                },
                _ = heartbeat.tick() => Message::Ping(Vec::new()),
            };
            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Signals `idle` once the client stops answering pings and sending events
    let idle = Arc::new(Notify::new());
    let idle_task = {
        let idle = Arc::clone(&idle);
        let registry = Arc::clone(supervisor.registry());
        let config = Arc::clone(&state.ws_config);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.ping_interval);
            interval.tick().await;

            loop {
                interval.tick().await;

                let timed_out = registry
                    .idle_for(connection_id)
                    .is_none_or(|idle_for| idle_for > config.ping_timeout + config.ping_interval);
                if timed_out {
                    debug!("Connection {} timed out", connection_id);
                    idle.notify_one();
                    break;
                }
            }
        })
    };

    // Handle incoming messages, one at a time in receipt order
    loop {
        let result = tokio::select! {
            next = ws_receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = idle.notified() => break,
        };

        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                supervisor.registry().touch(connection_id);

                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        if let Err(e) = supervisor.handle(&mut session, client_msg).await {
                            warn!("Dropping connection {}: {}", connection_id, e);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse client message: {}", e);
                        supervisor.registry().deliver(
                            connection_id,
                            ServerMessage::Error {
                                code: ErrorCode::InvalidMessage,
                                message: format!("Invalid message format: {}", e),
                                seq: None,
                            },
                        );
                    }
                }
            }
            Message::Binary(_) => {
                debug!("Ignoring binary message from {}", connection_id);
            }
            Message::Ping(_) | Message::Pong(_) => {
                supervisor.registry().touch(connection_id);
            }
            Message::Close(_) => {
                info!("Client {} requested close", connection_id);
                break;
            }
        }
    }

    // Cleanup
    idle_task.abort();
    supervisor.disconnect(&mut session).await;

    // Let queued frames (e.g. a final error) reach the client
    drop(tx);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }

    info!("WebSocket connection closed: {}", connection_id);
}
