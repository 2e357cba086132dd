use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vote counts per vote type. Open mapping: any label a client sends becomes a key.
pub type VoteTally = BTreeMap<String, u64>;

/// Client to Server events
///
/// Frames use a `{"event": ..., "data": {...}}` envelope. Every event may carry
/// an optional `seq` which is echoed back in the matching `ack` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Bind a user identity to this connection
    Authenticate {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    /// Join a room, leaving any other room first
    JoinRoom {
        room_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    /// Leave a room
    LeaveRoom {
        room_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    /// Chat message to everyone else in the room
    ChatMessage {
        room_id: String,
        user_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    /// Cast a vote of an arbitrary type
    Vote {
        room_id: String,
        user_id: String,
        #[serde(rename = "type")]
        vote_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    /// Keepalive
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

/// Server to Client events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Acknowledgment of an accepted client event
    Ack {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        /// Set when the event was accepted but changed nothing (e.g. leaving a room twice)
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        noop: bool,
    },
    /// Rejection of a client event
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    /// Sent to the joining connection with the room state at admission
    RoomJoined {
        room_id: String,
        members: Vec<String>,
        refreshed: bool,
        tally: VoteTally,
        history: Vec<ChatEntry>,
    },
    /// A user joined the room
    MemberJoined { room_id: String, user_id: String },
    /// A member joined the room they already occupy
    MemberRefreshed { room_id: String, user_id: String },
    /// A member left the room (explicitly or by disconnecting)
    MemberLeft { room_id: String, user_id: String },
    /// Chat broadcast
    ChatMessage {
        room_id: String,
        user_id: String,
        message: String,
        timestamp: u64,
    },
    /// Tally broadcast after a vote
    VoteUpdate { room_id: String, tally: VoteTally },
    /// Response to a client ping
    Pong,
}

/// One recorded chat line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub room_id: String,
    pub user_id: String,
    pub message: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotAMember,
    DuplicateBinding,
    InvalidMessage,
    VoteTypeLimit,
    VoteThrottled,
    MessageRejected,
    RateLimited,
}

impl ClientMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Authenticate { .. } => "authenticate",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom { .. } => "leave_room",
            ClientMessage::ChatMessage { .. } => "chat_message",
            ClientMessage::Vote { .. } => "vote",
            ClientMessage::Ping { .. } => "ping",
        }
    }

    pub fn seq(&self) -> Option<u64> {
        match self {
            ClientMessage::Authenticate { seq, .. }
            | ClientMessage::JoinRoom { seq, .. }
            | ClientMessage::LeaveRoom { seq, .. }
            | ClientMessage::ChatMessage { seq, .. }
            | ClientMessage::Vote { seq, .. }
            | ClientMessage::Ping { seq } => *seq,
        }
    }

    /// The user identity the client claims for this event, if the event carries one
    pub fn user_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Authenticate { user_id, .. }
            | ClientMessage::JoinRoom { user_id, .. }
            | ClientMessage::LeaveRoom { user_id, .. }
            | ClientMessage::ChatMessage { user_id, .. }
            | ClientMessage::Vote { user_id, .. } => Some(user_id),
            ClientMessage::Ping { .. } => None,
        }
    }
}

impl ServerMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Ack { .. } => "ack",
            ServerMessage::Error { .. } => "error",
            ServerMessage::RoomJoined { .. } => "room_joined",
            ServerMessage::MemberJoined { .. } => "member_joined",
            ServerMessage::MemberRefreshed { .. } => "member_refreshed",
            ServerMessage::MemberLeft { .. } => "member_left",
            ServerMessage::ChatMessage { .. } => "chat_message",
            ServerMessage::VoteUpdate { .. } => "vote_update",
            ServerMessage::Pong => "pong",
        }
    }

    pub fn ack(event: &str, seq: Option<u64>) -> Self {
        ServerMessage::Ack {
            event: event.to_string(),
            seq,
            noop: false,
        }
    }

    pub fn noop_ack(event: &str, seq: Option<u64>) -> Self {
        ServerMessage::Ack {
            event: event.to_string(),
            seq,
            noop: true,
        }
    }
}

impl From<ChatEntry> for ServerMessage {
    fn from(entry: ChatEntry) -> Self {
        ServerMessage::ChatMessage {
            room_id: entry.room_id,
            user_id: entry.user_id,
            message: entry.message,
            timestamp: entry.timestamp,
        }
    }
}
