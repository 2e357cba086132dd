pub mod rate_limit;
pub mod registry;
pub mod supervisor;

pub use rate_limit::{RateDecision, RateLimiter};
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use supervisor::{Session, SessionPhase, SessionSupervisor};
