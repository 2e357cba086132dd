use crate::error::RoomError;
use crate::room::state::{Room, RoomId, RoomSnapshot, RoomState};
use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// Room store: maps room ids to live rooms
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a room, creating it on first reference.
    ///
    /// Concurrent callers for an unseen id all receive the same instance.
    pub fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.get(room_id) {
            return Arc::clone(room.value());
        }

        let entry = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            counter!("quizroom_rooms_created_total").increment(1);
            info!("Created room {}", room_id);
            Arc::new(Room::new(room_id))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, room_id: &str) -> Result<Arc<Room>, RoomError> {
        self.rooms
            .get(room_id)
            .map(|room| Arc::clone(room.value()))
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))
    }

    /// Lock a room, creating it if needed. Never returns a retired instance.
    pub async fn lock_or_create(&self, room_id: &str) -> OwnedMutexGuard<RoomState> {
        loop {
            let state = self.get_or_create(room_id).lock().await;
            if !state.retired {
                return state;
            }
        }
    }

    /// Lock an existing room. Never returns a retired instance.
    pub async fn lock_existing(&self, room_id: &str) -> Result<OwnedMutexGuard<RoomState>, RoomError> {
        loop {
            let state = self.get(room_id)?.lock().await;
            if !state.retired {
                return Ok(state);
            }
        }
    }

    /// Delete the room if it has no members. Returns true if it was deleted.
    pub async fn delete_if_empty(&self, room_id: &str) -> bool {
        let Ok(room) = self.get(room_id) else {
            return false;
        };
        self.retire(&room, Duration::ZERO).await
    }

    /// Delete every room that has been empty for at least `grace`
    pub async fn reap_idle(&self, grace: Duration) -> usize {
        let candidates: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .map(|room| Arc::clone(room.value()))
            .collect();

        let mut reaped = 0;
        for room in candidates {
            if self.retire(&room, grace).await {
                reaped += 1;
            }
        }

        if reaped > 0 {
            debug!("Reaped {} idle rooms", reaped);
        }
        reaped
    }

    async fn retire(&self, room: &Arc<Room>, grace: Duration) -> bool {
        let mut state = room.lock().await;

        let idle_long_enough = state
            .empty_since
            .is_some_and(|since| since.elapsed() >= grace);
        if state.retired || !state.members.is_empty() || !idle_long_enough {
            return false;
        }

        state.retired = true;
        // Only drop this exact instance; the lock is still held so no writer can use it
        let removed = self
            .rooms
            .remove_if(&room.id, |_, current| Arc::ptr_eq(current, room))
            .is_some();

        if removed {
            counter!("quizroom_rooms_deleted_total").increment(1);
            info!(
                "Deleted room {} ({} votes, {} chat entries)",
                room.id,
                state.total_votes(),
                state.chat_log.len()
            );
        }
        removed
    }

    pub async fn snapshot(&self, room_id: &str) -> Result<RoomSnapshot, RoomError> {
        Ok(self.get(room_id)?.snapshot().await)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
