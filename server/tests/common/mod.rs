//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use quizroom_server::config::{RoomConfig, WsConfig};
use quizroom_server::protocol::{ClientMessage, ServerMessage};
use quizroom_server::server::{self, AppState};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// Default wait for an expected frame
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Create a test app router with default configuration
pub fn create_test_app() -> axum::Router {
    server::router(AppState::new())
}

/// A running server on an ephemeral port
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(RoomConfig::default()).await
    }

    pub async fn start_with(room: RoomConfig) -> Self {
        Self::start_with_config(room, WsConfig::default()).await
    }

    pub async fn start_with_config(room: RoomConfig, ws: WsConfig) -> Self {
        let state = AppState::with_config(room, ws);
        let app = server::router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn connect(&self) -> WsClient {
        WsClient::connect(&self.ws_url()).await
    }

    /// Wait until the server has processed every disconnect
    pub async fn wait_for_connections(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while self.state.get_stats().1 != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "Expected {} open connections, have {}",
                expected,
                self.state.get_stats().1
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn members(&self, room_id: &str) -> Vec<String> {
        self.state
            .supervisor
            .rooms()
            .snapshot(room_id)
            .await
            .map(|snapshot| snapshot.members)
            .unwrap_or_default()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// WebSocket client speaking the room protocol
pub struct WsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    seq: u64,
}

impl WsClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("WebSocket connect failed");
        Self { ws, seq: 0 }
    }

    pub async fn emit(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.ws.send(Message::Text(json.into())).await.unwrap();
    }

    /// Send a text frame as-is, bypassing the protocol types
    pub async fn emit_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    fn next_seq(&mut self) -> Option<u64> {
        self.seq += 1;
        Some(self.seq)
    }

    pub async fn join(&mut self, room_id: &str, user_id: &str) {
        let seq = self.next_seq();
        self.emit(ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            seq,
        })
        .await;
    }

    pub async fn leave(&mut self, room_id: &str, user_id: &str) {
        let seq = self.next_seq();
        self.emit(ClientMessage::LeaveRoom {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            seq,
        })
        .await;
    }

    pub async fn chat(&mut self, room_id: &str, user_id: &str, message: &str) {
        let seq = self.next_seq();
        self.emit(ClientMessage::ChatMessage {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            seq,
        })
        .await;
    }

    pub async fn vote(&mut self, room_id: &str, user_id: &str, vote_type: &str) {
        let seq = self.next_seq();
        self.emit(ClientMessage::Vote {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            vote_type: vote_type.to_string(),
            seq,
        })
        .await;
    }

    /// Join and wait for the `room_joined` reply
    pub async fn join_and_wait(&mut self, room_id: &str, user_id: &str) -> ServerMessage {
        self.join(room_id, user_id).await;
        self.expect(|m| matches!(m, ServerMessage::RoomJoined { .. }))
            .await
    }

    /// Next server frame, or None on timeout or close
    pub async fn recv(&mut self, timeout: Duration) -> Option<ServerMessage> {
        let result = tokio::time::timeout(timeout, async {
            while let Some(frame) = self.ws.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        return serde_json::from_str::<ServerMessage>(&text).ok();
                    }
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(_) => continue,
                }
            }
            None
        })
        .await;
        result.ok().flatten()
    }

    /// Skip frames until one matches, panicking on timeout
    pub async fn expect(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv(remaining).await {
                Some(msg) if pred(&msg) => return msg,
                Some(_) => continue,
                None => panic!("Timed out waiting for expected server message"),
            }
        }
    }

    /// Every frame received within `window`
    pub async fn collect(&mut self, window: Duration) -> Vec<ServerMessage> {
        let deadline = tokio::time::Instant::now() + window;
        let mut frames = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.recv(remaining).await {
                Some(msg) => frames.push(msg),
                None => break,
            }
        }
        frames
    }

    /// True once the server has closed the socket
    pub async fn is_closed(&mut self, timeout: Duration) -> bool {
        let result = tokio::time::timeout(timeout, async {
            while let Some(frame) = self.ws.next().await {
                match frame {
                    Ok(Message::Close(_)) | Err(_) => return true,
                    Ok(_) => continue,
                }
            }
            true
        })
        .await;
        result.unwrap_or(false)
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Chat bodies in received frames, in arrival order
pub fn chat_bodies(frames: &[ServerMessage]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ServerMessage::ChatMessage { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Initialize test logging for detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizroom_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
