pub mod chat;
pub mod membership;
pub mod moderation;
pub mod state;
pub mod store;
pub mod vote;

pub use chat::{ChatDelivery, ChatFanout};
pub use membership::{Departure, JoinKind, JoinOutcome, LeaveCause, MembershipCoordinator};
pub use moderation::ProfanityFilter;
pub use state::{Room, RoomId, RoomSnapshot, UserId};
pub use store::RoomStore;
pub use vote::{VoteAggregator, VoteUpdate};
