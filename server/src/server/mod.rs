mod websocket;

pub use websocket::{ConnectParams, ws_handler};

use crate::config::{RoomConfig, WsConfig};
use crate::session::SessionSupervisor;
use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<SessionSupervisor>,
    pub ws_config: Arc<WsConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_config(RoomConfig::default(), WsConfig::default())
    }

    pub fn with_config(room: RoomConfig, ws: WsConfig) -> Self {
        Self {
            supervisor: Arc::new(SessionSupervisor::new(room)),
            ws_config: Arc::new(ws),
            started_at: Instant::now(),
        }
    }

    /// (active rooms, open connections)
    pub fn get_stats(&self) -> (usize, usize) {
        self.supervisor.stats()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Server version
    pub version: String,
    /// Number of live rooms
    pub active_rooms: usize,
    /// Open WebSocket connections
    pub total_connections: usize,
    /// Users holding a membership slot
    pub tracked_users: usize,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let (rooms, connections) = state.get_stats();

    Json(StatsResponse {
        uptime_seconds: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_rooms: rooms,
        total_connections: connections,
        tracked_users: state.supervisor.membership().tracked_users(),
    })
}

/// Routes served by the room server: the event socket and JSON stats
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(stats))
        .route("/ws", get(ws_handler))
        .with_state(state)
}
