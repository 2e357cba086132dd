use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::protocol::ChatEntry;
use crate::room::moderation::ProfanityFilter;
use crate::room::state::now_millis;
use crate::room::store::RoomStore;
use crate::session::registry::ConnectionId;
use metrics::counter;
use std::sync::Arc;
use tracing::debug;

/// Who receives a recorded chat entry. Delivery is up to the caller.
#[derive(Debug, Clone)]
pub struct ChatDelivery {
    pub entry: ChatEntry,
    pub recipients: Vec<ConnectionId>,
}

/// Chat fan-out engine
pub struct ChatFanout {
    store: Arc<RoomStore>,
    filter: Option<ProfanityFilter>,
    config: RoomConfig,
}

impl ChatFanout {
    pub fn new(store: Arc<RoomStore>, config: RoomConfig) -> Self {
        let filter = config
            .profanity_filter
            .then(|| ProfanityFilter::new(&config.blocked_words));
        Self {
            store,
            filter,
            config,
        }
    }

    /// Record a chat message and compute its recipients from the membership at admission
    pub async fn send(
        &self,
        room_id: &str,
        sender_id: &str,
        message: String,
    ) -> Result<ChatDelivery, RoomError> {
        if message.trim().is_empty() {
            return Err(RoomError::InvalidMessage("chat message is empty".to_string()));
        }
        let len = message.chars().count();
        if len > self.config.max_chat_message_len {
            return Err(RoomError::InvalidMessage(format!(
                "chat message is {} characters, limit is {}",
                len, self.config.max_chat_message_len
            )));
        }

        if let Some(filter) = &self.filter
            && filter.is_profane(&message)
        {
            counter!("quizroom_chat_filtered_total").increment(1);
            return Err(RoomError::MessageRejected {
                room_id: room_id.to_string(),
                user_id: sender_id.to_string(),
            });
        }

        let not_a_member = || RoomError::NotAMember {
            room_id: room_id.to_string(),
            user_id: sender_id.to_string(),
        };

        let mut state = self
            .store
            .lock_existing(room_id)
            .await
            .map_err(|_| not_a_member())?;
        if !state.is_member(sender_id) {
            counter!("quizroom_chat_rejected_total").increment(1);
            return Err(not_a_member());
        }

        let entry = ChatEntry {
            room_id: room_id.to_string(),
            user_id: sender_id.to_string(),
            message,
            timestamp: now_millis(),
        };
        state.push_chat(entry.clone(), self.config.chat_log_capacity);

        let exclude = (!self.config.echo_chat_to_sender).then_some(sender_id);
        let recipients = state.recipients(exclude);
        drop(state);

        counter!("quizroom_chat_messages_total").increment(1);
        debug!(
            "Chat from {} in room {} fanned out to {} connections",
            sender_id,
            room_id,
            recipients.len()
        );

        Ok(ChatDelivery { entry, recipients })
    }
}
