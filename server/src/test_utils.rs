//! Test Utilities Module
//!
//! Helpers for driving the session supervisor without a transport.
//! This module is only compiled when running tests.

#![cfg(test)]

use crate::config::RoomConfig;
use crate::error::SupervisorError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::supervisor::{Session, SessionSupervisor};
use std::time::Duration;
use tokio::sync::mpsc;

/// Supervisor with immediate room teardown
pub fn test_supervisor() -> SessionSupervisor {
    SessionSupervisor::new(RoomConfig {
        empty_room_grace: Duration::ZERO,
        ..RoomConfig::default()
    })
}

/// A connection without a socket: frames land in `outbox`
pub struct TestClient {
    pub session: Session,
    outbox: mpsc::Receiver<ServerMessage>,
}

impl TestClient {
    pub fn connect(supervisor: &SessionSupervisor) -> Self {
        let (tx, outbox) = mpsc::channel(256);
        let session = supervisor.connect(tx);
        Self { session, outbox }
    }

    pub async fn send(
        &mut self,
        supervisor: &SessionSupervisor,
        msg: ClientMessage,
    ) -> Result<(), SupervisorError> {
        supervisor.handle(&mut self.session, msg).await
    }

    /// Every frame queued so far
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbox.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

pub fn join(room_id: &str, user_id: &str) -> ClientMessage {
    ClientMessage::JoinRoom {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        seq: Some(1),
    }
}

pub fn leave(room_id: &str, user_id: &str) -> ClientMessage {
    ClientMessage::LeaveRoom {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        seq: Some(1),
    }
}

pub fn chat(room_id: &str, user_id: &str, message: &str) -> ClientMessage {
    ClientMessage::ChatMessage {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        message: message.to_string(),
        seq: Some(1),
    }
}

pub fn vote(room_id: &str, user_id: &str, vote_type: &str) -> ClientMessage {
    ClientMessage::Vote {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        vote_type: vote_type.to_string(),
        seq: Some(1),
    }
}
