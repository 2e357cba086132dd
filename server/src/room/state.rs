use crate::error::RoomError;
use crate::protocol::{ChatEntry, VoteTally};
use crate::session::registry::ConnectionId;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub type RoomId = String;
pub type UserId = String;

/// A room and its critical section.
///
/// All membership, chat and vote mutations for one room go through
/// [`Room::lock`]; different rooms never share a lock.
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub created_at: u64,
    state: Arc<Mutex<RoomState>>,
}

/// Mutable room state, only reachable through the room lock
#[derive(Debug)]
pub struct RoomState {
    pub id: RoomId,
    /// Members in join order, each mapped to the connection that owns the membership
    pub members: IndexMap<UserId, ConnectionId>,
    pub chat_log: VecDeque<ChatEntry>,
    pub tally: VoteTally,
    /// Last accepted vote per user; kept across leave and rejoin
    pub last_vote: HashMap<UserId, Instant>,
    /// Set when the last member leaves, cleared on the next join
    pub empty_since: Option<Instant>,
    /// Set once the store has dropped this instance; writers must re-resolve the room
    pub retired: bool,
}

/// Read-only view of a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub created_at: u64,
    pub members: Vec<UserId>,
    pub tally: VoteTally,
    pub chat_len: usize,
}

impl Room {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            created_at: now_millis(),
            state: Arc::new(Mutex::new(RoomState::new(id))),
        }
    }

    /// Enter the room's critical section
    pub async fn lock(&self) -> OwnedMutexGuard<RoomState> {
        Arc::clone(&self.state).lock_owned().await
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        let state = self.lock().await;
        RoomSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            members: state.member_ids(),
            tally: state.tally.clone(),
            chat_len: state.chat_log.len(),
        }
    }
}

impl RoomState {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            members: IndexMap::new(),
            chat_log: VecDeque::new(),
            tally: VoteTally::new(),
            last_vote: HashMap::new(),
            empty_since: Some(Instant::now()),
            retired: false,
        }
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.keys().cloned().collect()
    }

    /// Connections of all current members, optionally skipping one user
    pub fn recipients(&self, exclude: Option<&str>) -> Vec<ConnectionId> {
        self.members
            .iter()
            .filter(|(user_id, _)| Some(user_id.as_str()) != exclude)
            .map(|(_, connection_id)| *connection_id)
            .collect()
    }

    /// Append to the chat log, evicting the oldest entries beyond `capacity`
    pub fn push_chat(&mut self, entry: ChatEntry, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.chat_log.len() >= capacity {
            self.chat_log.pop_front();
        }
        self.chat_log.push_back(entry);
    }

    /// The last `limit` chat entries, oldest first
    pub fn recent_history(&self, limit: usize) -> Vec<ChatEntry> {
        let skip = self.chat_log.len().saturating_sub(limit);
        self.chat_log.iter().skip(skip).cloned().collect()
    }

    /// Count one vote. New labels are inserted on demand unless `max_types` is reached.
    pub fn record_vote(&mut self, vote_type: &str, max_types: Option<usize>) -> Result<u64, RoomError> {
        if let Some(count) = self.tally.get_mut(vote_type) {
            *count += 1;
            return Ok(*count);
        }

        if let Some(limit) = max_types
            && self.tally.len() >= limit
        {
            return Err(RoomError::VoteTypeLimit {
                room_id: self.id.clone(),
                limit,
            });
        }

        self.tally.insert(vote_type.to_string(), 1);
        Ok(1)
    }

    /// Time left before `user_id` may vote again, if still inside `window`
    pub fn vote_cooldown(&self, user_id: &str, window: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_vote.get(user_id)?;
        window
            .checked_sub(now.saturating_duration_since(*last))
            .filter(|left| !left.is_zero())
    }

    /// Start a new throttle window for `user_id`, dropping windows that ended
    pub fn note_vote(&mut self, user_id: &str, window: Duration, now: Instant) {
        self.last_vote
            .retain(|_, last| now.saturating_duration_since(*last) < window);
        if !window.is_zero() {
            self.last_vote.insert(user_id.to_string(), now);
        }
    }

    pub fn total_votes(&self) -> u64 {
        self.tally.values().sum()
    }
}

/// Get current timestamp in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
