use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::protocol::{ChatEntry, VoteTally};
use crate::room::state::{RoomId, UserId};
use crate::room::store::RoomStore;
use crate::session::registry::ConnectionId;
use dashmap::DashMap;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Whether a join added the user or found them already present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Joined,
    Refreshed,
}

/// Result of a join, captured while the room lock was held
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room_id: RoomId,
    pub kind: JoinKind,
    /// Membership in join order, including the joining user
    pub members: Vec<UserId>,
    pub tally: VoteTally,
    pub history: Vec<ChatEntry>,
    /// Connections of the other members
    pub others: Vec<ConnectionId>,
    /// The room the user was implicitly removed from
    pub left: Option<Departure>,
}

/// A membership removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// Connections of the members that remain
    pub remaining: Vec<ConnectionId>,
    pub room_closed: bool,
}

/// Why a membership is being removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveCause {
    Explicit,
    /// Transport closed; only removes a membership owned by this connection
    Disconnect(ConnectionId),
}

impl LeaveCause {
    fn label(&self) -> &'static str {
        match self {
            LeaveCause::Explicit => "explicit",
            LeaveCause::Disconnect(_) => "disconnect",
        }
    }
}

/// Membership coordinator: join/leave with at most one room per user.
///
/// Lock order is user slot, then room. Chat and votes only take the room lock.
pub struct MembershipCoordinator {
    store: Arc<RoomStore>,
    users: DashMap<UserId, Arc<Mutex<Option<RoomId>>>>,
    config: RoomConfig,
}

impl MembershipCoordinator {
    pub fn new(store: Arc<RoomStore>, config: RoomConfig) -> Self {
        Self {
            store,
            users: DashMap::new(),
            config,
        }
    }

    fn user_slot(&self, user_id: &str) -> Arc<Mutex<Option<RoomId>>> {
        if let Some(slot) = self.users.get(user_id) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)));
        Arc::clone(slot.value())
    }

    /// Drop the user's slot once nobody holds it and the user is in no room
    fn release_user_slot(&self, user_id: &str) {
        self.users.remove_if(user_id, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|room| room.is_none())
        });
    }

    /// Join a room, implicitly leaving any other room first
    pub async fn join(&self, room_id: &str, user_id: &str, connection_id: ConnectionId) -> JoinOutcome {
        let start = Instant::now();
        let slot = self.user_slot(user_id);
        let mut current = slot.lock().await;

        let mut left = None;
        if let Some(previous) = current.as_ref().filter(|r| r.as_str() != room_id).cloned() {
            match self
                .remove_member(&previous, user_id, LeaveCause::Explicit)
                .await
            {
                Ok(departure) => left = departure,
                Err(e) => debug!("Previous room of {} already gone: {}", user_id, e),
            }
            *current = None;
        }

        let mut state = self.store.lock_or_create(room_id).await;
        let kind = match state.members.get_mut(user_id) {
            Some(owner) => {
                *owner = connection_id;
                JoinKind::Refreshed
            }
            None => {
                state.members.insert(user_id.to_string(), connection_id);
                JoinKind::Joined
            }
        };
        state.empty_since = None;
        *current = Some(room_id.to_string());

        let outcome = JoinOutcome {
            room_id: room_id.to_string(),
            kind,
            members: state.member_ids(),
            tally: state.tally.clone(),
            history: state.recent_history(self.config.history_on_join),
            others: state.recipients(Some(user_id)),
            left,
        };
        drop(state);

        match kind {
            JoinKind::Joined => {
                counter!("quizroom_room_joins_total", "kind" => "joined").increment(1);
                info!("User {} joined room {}", user_id, room_id);
            }
            JoinKind::Refreshed => {
                counter!("quizroom_room_joins_total", "kind" => "refreshed").increment(1);
                debug!("User {} refreshed membership of room {}", user_id, room_id);
            }
        }
        histogram!("quizroom_room_members").record(outcome.members.len() as f64);
        histogram!("quizroom_room_join_duration_seconds").record(start.elapsed());

        outcome
    }

    /// Leave a room.
    ///
    /// `Ok(None)` when the user was not a member (or, for a disconnect, when a
    /// newer connection owns the membership). `RoomNotFound` only when the room
    /// does not exist.
    pub async fn leave(
        &self,
        room_id: &str,
        user_id: &str,
        cause: LeaveCause,
    ) -> Result<Option<Departure>, RoomError> {
        let slot = self.user_slot(user_id);
        let result = {
            let mut current = slot.lock().await;
            let result = self.remove_member(room_id, user_id, cause).await;
            if matches!(result, Ok(Some(_))) && current.as_deref() == Some(room_id) {
                *current = None;
            }
            result
        };
        drop(slot);
        self.release_user_slot(user_id);
        result
    }

    async fn remove_member(
        &self,
        room_id: &str,
        user_id: &str,
        cause: LeaveCause,
    ) -> Result<Option<Departure>, RoomError> {
        let mut state = self.store.lock_existing(room_id).await?;

        let Some(owner) = state.members.get(user_id).copied() else {
            return Ok(None);
        };
        if let LeaveCause::Disconnect(connection_id) = cause
            && connection_id != owner
        {
            debug!(
                "Ignoring stale disconnect of {} for {} in room {}",
                connection_id, user_id, room_id
            );
            return Ok(None);
        }

        state.members.shift_remove(user_id);
        let remaining = state.recipients(None);
        let now_empty = state.members.is_empty();
        if now_empty {
            state.empty_since = Some(Instant::now());
        }
        drop(state);

        counter!("quizroom_room_leaves_total", "cause" => cause.label()).increment(1);
        info!("User {} left room {} ({})", user_id, room_id, cause.label());

        let room_closed =
            now_empty && self.config.empty_room_grace.is_zero() && self.store.delete_if_empty(room_id).await;

        Ok(Some(Departure {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            remaining,
            room_closed,
        }))
    }

    /// The room the user currently occupies
    pub async fn room_of(&self, user_id: &str) -> Option<RoomId> {
        let slot = self.users.get(user_id).map(|slot| Arc::clone(slot.value()))?;
        let current = slot.lock().await;
        current.clone()
    }

    /// The connection that owns the user's membership in `room_id`
    pub async fn owner_of(&self, room_id: &str, user_id: &str) -> Option<ConnectionId> {
        let state = self.store.lock_existing(room_id).await.ok()?;
        state.members.get(user_id).copied()
    }

    /// Users with a membership slot, in a room or not
    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}
