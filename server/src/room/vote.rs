use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::protocol::VoteTally;
use crate::room::store::RoomStore;
use crate::session::registry::ConnectionId;
use metrics::counter;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Tally after a cast, with every member's connection as recipient
#[derive(Debug, Clone)]
pub struct VoteUpdate {
    pub room_id: String,
    pub tally: VoteTally,
    pub recipients: Vec<ConnectionId>,
}

/// Vote aggregator
pub struct VoteAggregator {
    store: Arc<RoomStore>,
    config: RoomConfig,
}

impl VoteAggregator {
    pub fn new(store: Arc<RoomStore>, config: RoomConfig) -> Self {
        Self { store, config }
    }

    /// Count one vote from a current member
    pub async fn cast(
        &self,
        room_id: &str,
        voter_id: &str,
        vote_type: &str,
    ) -> Result<VoteUpdate, RoomError> {
        let vote_type = vote_type.trim();
        if vote_type.is_empty() {
            return Err(RoomError::InvalidMessage("vote type is empty".to_string()));
        }

        let not_a_member = || RoomError::NotAMember {
            room_id: room_id.to_string(),
            user_id: voter_id.to_string(),
        };

        let mut state = self
            .store
            .lock_existing(room_id)
            .await
            .map_err(|_| not_a_member())?;
        if !state.is_member(voter_id) {
            counter!("quizroom_votes_rejected_total").increment(1);
            return Err(not_a_member());
        }

        let now = Instant::now();
        let window = self.config.vote_throttle_window;
        if let Some(left) = state.vote_cooldown(voter_id, window, now) {
            counter!("quizroom_votes_throttled_total").increment(1);
            return Err(RoomError::VoteThrottled {
                room_id: room_id.to_string(),
                user_id: voter_id.to_string(),
                retry_after_ms: left.as_millis().max(1) as u64,
            });
        }

        let count = state.record_vote(vote_type, self.config.max_vote_types)?;
        state.note_vote(voter_id, window, now);
        let update = VoteUpdate {
            room_id: room_id.to_string(),
            tally: state.tally.clone(),
            recipients: state.recipients(None),
        };
        drop(state);

        counter!("quizroom_votes_total").increment(1);
        debug!(
            "Vote {} from {} in room {} (now {})",
            vote_type, voter_id, room_id, count
        );

        Ok(update)
    }

    pub async fn tally(&self, room_id: &str) -> Result<VoteTally, RoomError> {
        let state = self.store.lock_existing(room_id).await?;
        Ok(state.tally.clone())
    }
}
