//! Quizroom Server Library
//!
//! Room-scoped real-time chat and voting. Exported for integration tests
//! and external tooling.

pub mod config;
pub mod error;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use error::{RegistryError, RoomError, SupervisorError};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::AppState;
pub use session::SessionSupervisor;
