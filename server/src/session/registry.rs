use crate::error::RegistryError;
use crate::protocol::ServerMessage;
use crate::room::state::{UserId, now_millis};
use dashmap::DashMap;
use metrics::{counter, histogram};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Connection state for a single client
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: Option<UserId>,
    pub alive: bool,
    pub connected_at: u64,
    pub last_seen: Instant,
    sender: mpsc::Sender<ServerMessage>,
}

impl Connection {
    /// Time since registration, from wall-clock millis
    pub fn uptime(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.connected_at))
    }
}

/// Connection registry: every live connection and its bound identity
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection whose outbound frames go to `sender`
    pub fn register(&self, sender: mpsc::Sender<ServerMessage>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                id,
                user_id: None,
                alive: true,
                connected_at: now_millis(),
                last_seen: Instant::now(),
                sender,
            },
        );
        counter!("quizroom_connections_total").increment(1);
        debug!("Registered connection {}", id);
        id
    }

    /// Bind a user identity. Rebinding the same identity is a no-op; a different one fails.
    ///
    /// Returns true when the identity was newly bound.
    pub fn bind_user(&self, connection_id: ConnectionId, user_id: &str) -> Result<bool, RegistryError> {
        let mut connection = self
            .connections
            .get_mut(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;

        if let Some(bound) = connection.user_id.as_deref() {
            if bound == user_id {
                return Ok(false);
            }
            return Err(RegistryError::DuplicateBinding {
                connection_id,
                bound: bound.to_string(),
                requested: user_id.to_string(),
            });
        }

        connection.user_id = Some(user_id.to_string());
        debug!("Connection {} bound to user {}", connection_id, user_id);
        Ok(true)
    }

    /// Stop delivering to a connection that is being torn down
    pub fn mark_closing(&self, connection_id: ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.alive = false;
        }
    }

    /// Remove a connection
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Connection> {
        let (_, mut connection) = self.connections.remove(&connection_id)?;
        connection.alive = false;
        let uptime = connection.uptime();
        histogram!("quizroom_connection_duration_seconds").record(uptime.as_secs_f64());
        debug!(
            "Unregistered connection {} after {:?}",
            connection_id, uptime
        );
        Some(connection)
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.connections
            .get(&connection_id)
            .and_then(|connection| connection.user_id.clone())
    }

    pub fn is_alive(&self, connection_id: ConnectionId) -> bool {
        self.connections
            .get(&connection_id)
            .is_some_and(|connection| connection.alive)
    }

    /// Record inbound activity
    pub fn touch(&self, connection_id: ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.last_seen = Instant::now();
        }
    }

    /// Time since the last inbound activity, None if the connection is gone
    pub fn idle_for(&self, connection_id: ConnectionId) -> Option<Duration> {
        self.connections
            .get(&connection_id)
            .map(|connection| connection.last_seen.elapsed())
    }

    /// Queue a frame for one connection without waiting.
    ///
    /// A full or closed outbox drops the frame; retrying is up to the transport.
    pub fn deliver(&self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        let sender = match self.connections.get(&connection_id) {
            Some(connection) if connection.alive => connection.sender.clone(),
            _ => return false,
        };

        let message_type = message.message_type();
        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                counter!("quizroom_deliveries_dropped_total", "reason" => "full").increment(1);
                warn!(
                    "Outbox full for connection {}, dropped {}",
                    connection_id, message_type
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                counter!("quizroom_deliveries_dropped_total", "reason" => "closed").increment(1);
                debug!(
                    "Outbox closed for connection {}, dropped {}",
                    connection_id, message_type
                );
                false
            }
        }
    }

    /// Queue the same frame for many connections. Returns how many accepted it.
    pub fn broadcast(&self, recipients: &[ConnectionId], message: &ServerMessage) -> usize {
        recipients
            .iter()
            .filter(|&&connection_id| self.deliver(connection_id, message.clone()))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
