use crate::protocol::ErrorCode;
use crate::room::state::{RoomId, UserId};
use crate::session::registry::ConnectionId;
use thiserror::Error;

/// Room-level errors: recovered locally by answering the sender
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("User {user_id} is not a member of room {room_id}")]
    NotAMember { room_id: RoomId, user_id: UserId },

    /// Never sent on the wire: leave answers it with a no-op ack and
    /// chat or vote report `NotAMember`
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message contains inappropriate language")]
    MessageRejected { room_id: RoomId, user_id: UserId },

    #[error("Room {room_id} already tracks {limit} vote types")]
    VoteTypeLimit { room_id: RoomId, limit: usize },

    #[error("Voting too quickly in room {room_id}, retry in {retry_after_ms}ms")]
    VoteThrottled {
        room_id: RoomId,
        user_id: UserId,
        retry_after_ms: u64,
    },
}

/// Connection registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Connection {connection_id} is bound to {bound}, refusing rebind to {requested}")]
    DuplicateBinding {
        connection_id: ConnectionId,
        bound: UserId,
        requested: UserId,
    },

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// Errors surfaced while handling one inbound event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64, banned: bool },
}

impl SupervisorError {
    /// Wire code reported to the client
    pub fn code(&self) -> ErrorCode {
        match self {
            SupervisorError::Room(RoomError::NotAMember { .. })
            | SupervisorError::Room(RoomError::RoomNotFound(_)) => ErrorCode::NotAMember,
            SupervisorError::Room(RoomError::InvalidMessage(_)) => ErrorCode::InvalidMessage,
            SupervisorError::Room(RoomError::MessageRejected { .. }) => ErrorCode::MessageRejected,
            SupervisorError::Room(RoomError::VoteTypeLimit { .. }) => ErrorCode::VoteTypeLimit,
            SupervisorError::Room(RoomError::VoteThrottled { .. }) => ErrorCode::VoteThrottled,
            SupervisorError::Registry(RegistryError::DuplicateBinding { .. }) => {
                ErrorCode::DuplicateBinding
            }
            // The connection is already torn down
            SupervisorError::Registry(RegistryError::UnknownConnection(_)) => {
                ErrorCode::InvalidMessage
            }
            SupervisorError::RateLimited { .. } => ErrorCode::RateLimited,
        }
    }

    /// Fatal errors end the connection
    pub fn is_fatal(&self) -> bool {
        matches!(self, SupervisorError::Registry(_))
    }
}
