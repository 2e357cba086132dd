use crate::config::RoomConfig;
use crate::error::{RoomError, SupervisorError};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::room::{
    ChatFanout, Departure, JoinKind, LeaveCause, MembershipCoordinator, RoomId, RoomStore,
    UserId, VoteAggregator,
};
use crate::session::rate_limit::{RateDecision, RateLimiter};
use crate::session::registry::{ConnectionId, ConnectionRegistry};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Authenticated,
    Idle,
    InRoom(RoomId),
    Disconnected,
}

/// Per-connection session, owned by the task reading that connection.
///
/// `phase` is this connection's view. Another connection of the same user can
/// move or take over the membership; [`SessionSupervisor::sync_phase`]
/// reconciles it before each event.
#[derive(Debug)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: Option<UserId>,
    pub phase: SessionPhase,
    limiter: RateLimiter,
}

/// Session supervisor: binds inbound connections to the room components
pub struct SessionSupervisor {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomStore>,
    membership: MembershipCoordinator,
    chat: ChatFanout,
    votes: VoteAggregator,
    config: RoomConfig,
}

impl SessionSupervisor {
    pub fn new(config: RoomConfig) -> Self {
        let rooms = Arc::new(RoomStore::new());
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            membership: MembershipCoordinator::new(Arc::clone(&rooms), config.clone()),
            chat: ChatFanout::new(Arc::clone(&rooms), config.clone()),
            votes: VoteAggregator::new(Arc::clone(&rooms), config.clone()),
            rooms,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn rooms(&self) -> &Arc<RoomStore> {
        &self.rooms
    }

    pub fn membership(&self) -> &MembershipCoordinator {
        &self.membership
    }

    pub fn chat(&self) -> &ChatFanout {
        &self.chat
    }

    pub fn votes(&self) -> &VoteAggregator {
        &self.votes
    }

    /// Register a new connection
    pub fn connect(&self, sender: mpsc::Sender<ServerMessage>) -> Session {
        let connection_id = self.registry.register(sender);
        Session {
            connection_id,
            user_id: None,
            phase: SessionPhase::Connecting,
            limiter: RateLimiter::new(self.config.rate_limit),
        }
    }

    /// Bind the session to a user identity
    pub fn authenticate(&self, session: &mut Session, user_id: &str) -> Result<(), SupervisorError> {
        if user_id.trim().is_empty() {
            return Err(RoomError::InvalidMessage("userId is empty".to_string()).into());
        }
        self.registry.bind_user(session.connection_id, user_id)?;
        session.user_id = Some(user_id.to_string());
        if session.phase == SessionPhase::Connecting {
            session.phase = SessionPhase::Authenticated;
            info!(
                "Connection {} authenticated as {}",
                session.connection_id, user_id
            );
        }
        Ok(())
    }

    /// Handle one inbound event.
    ///
    /// Rejections are answered with an `error` frame. Only fatal errors are
    /// returned; the caller must then close the connection.
    pub async fn handle(&self, session: &mut Session, msg: ClientMessage) -> Result<(), SupervisorError> {
        let start = Instant::now();
        let message_type = msg.message_type();
        let seq = msg.seq();
        counter!("quizroom_events_total", "type" => message_type).increment(1);

        let result = match session.limiter.check() {
            RateDecision::Allowed => {
                self.sync_phase(session).await;
                self.dispatch(session, msg).await
            }
            RateDecision::Limited { retry_after } => Err(SupervisorError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
                banned: false,
            }),
            RateDecision::Banned { retry_after } => Err(SupervisorError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
                banned: true,
            }),
        };
        histogram!("quizroom_event_duration_seconds", "type" => message_type)
            .record(start.elapsed());

        let Err(e) = result else {
            return Ok(());
        };

        counter!("quizroom_events_rejected_total", "type" => message_type).increment(1);
        self.registry.deliver(
            session.connection_id,
            ServerMessage::Error {
                code: e.code(),
                message: e.to_string(),
                seq,
            },
        );

        if e.is_fatal() {
            warn!(
                "Closing connection {} after {}: {}",
                session.connection_id, message_type, e
            );
            Err(e)
        } else {
            debug!(
                "Rejected {} from {}: {}",
                message_type, session.connection_id, e
            );
            Ok(())
        }
    }

    async fn dispatch(&self, session: &mut Session, msg: ClientMessage) -> Result<(), SupervisorError> {
        let event = msg.message_type();
        if let Some(user_id) = msg.user_id() {
            self.authenticate(session, user_id)?;
        }

        match msg {
            ClientMessage::Ping { .. } => {
                self.reply(session, ServerMessage::Pong);
            }
            ClientMessage::Authenticate { seq, .. } => {
                self.reply(session, ServerMessage::ack(event, seq));
            }
            ClientMessage::JoinRoom {
                room_id, user_id, seq, ..
            } => {
                if room_id.trim().is_empty() {
                    return Err(RoomError::InvalidMessage("roomId is empty".to_string()).into());
                }

                let outcome = self
                    .membership
                    .join(&room_id, &user_id, session.connection_id)
                    .await;

                if let Some(departure) = &outcome.left {
                    self.announce_departure(departure);
                }

                let notice = match outcome.kind {
                    JoinKind::Joined => ServerMessage::MemberJoined {
                        room_id: room_id.clone(),
                        user_id: user_id.clone(),
                    },
                    JoinKind::Refreshed => ServerMessage::MemberRefreshed {
                        room_id: room_id.clone(),
                        user_id: user_id.clone(),
                    },
                };
                self.registry.broadcast(&outcome.others, &notice);

                self.reply(
                    session,
                    ServerMessage::RoomJoined {
                        room_id: room_id.clone(),
                        members: outcome.members,
                        refreshed: outcome.kind == JoinKind::Refreshed,
                        tally: outcome.tally,
                        history: outcome.history,
                    },
                );
                self.reply(session, ServerMessage::ack(event, seq));
                session.phase = SessionPhase::InRoom(room_id);
            }
            ClientMessage::LeaveRoom {
                room_id, user_id, seq, ..
            } => {
                let ack = match self
                    .membership
                    .leave(&room_id, &user_id, LeaveCause::Explicit)
                    .await
                {
                    Ok(Some(departure)) => {
                        self.announce_departure(&departure);
                        ServerMessage::ack(event, seq)
                    }
                    Ok(None) => ServerMessage::noop_ack(event, seq),
                    Err(RoomError::RoomNotFound(_)) => {
                        debug!("Leave of unknown room {} by {}", room_id, user_id);
                        ServerMessage::noop_ack(event, seq)
                    }
                    Err(e) => return Err(e.into()),
                };
                if session.phase == SessionPhase::InRoom(room_id) {
                    session.phase = SessionPhase::Idle;
                }
                self.reply(session, ack);
            }
            ClientMessage::ChatMessage {
                room_id,
                user_id,
                message,
                seq,
            } => {
                let delivery = self.chat.send(&room_id, &user_id, message).await?;
                let recipients = delivery.recipients;
                self.registry
                    .broadcast(&recipients, &ServerMessage::from(delivery.entry));
                self.reply(session, ServerMessage::ack(event, seq));
            }
            ClientMessage::Vote {
                room_id,
                user_id,
                vote_type,
                seq,
            } => {
                let update = self.votes.cast(&room_id, &user_id, &vote_type).await?;
                self.registry.broadcast(
                    &update.recipients,
                    &ServerMessage::VoteUpdate {
                        room_id: update.room_id,
                        tally: update.tally,
                    },
                );
                self.reply(session, ServerMessage::ack(event, seq));
            }
        }

        Ok(())
    }

    /// Tear down a session: implicit leave, then unregistration
    pub async fn disconnect(&self, session: &mut Session) {
        if session.phase == SessionPhase::Disconnected {
            return;
        }
        self.registry.mark_closing(session.connection_id);

        if let Some(user_id) = session.user_id.as_deref()
            && let Some(room_id) = self.membership.room_of(user_id).await
        {
            match self
                .membership
                .leave(
                    &room_id,
                    user_id,
                    LeaveCause::Disconnect(session.connection_id),
                )
                .await
            {
                Ok(Some(departure)) => self.announce_departure(&departure),
                Ok(None) => debug!(
                    "Disconnect of {} left no membership in {}",
                    session.connection_id, room_id
                ),
                Err(e) => debug!("Disconnect cleanup for {}: {}", session.connection_id, e),
            }
        }

        self.registry.unregister(session.connection_id);
        session.phase = SessionPhase::Disconnected;
        info!("Session {} disconnected", session.connection_id);
    }

    /// Drop `InRoom` when this connection no longer owns that membership
    pub async fn sync_phase<'s>(&self, session: &'s mut Session) -> &'s SessionPhase {
        if let SessionPhase::InRoom(room_id) = &session.phase
            && let Some(user_id) = session.user_id.as_deref()
            && self.membership.owner_of(room_id, user_id).await != Some(session.connection_id)
        {
            debug!(
                "Connection {} no longer holds {} in room {}",
                session.connection_id, user_id, room_id
            );
            session.phase = SessionPhase::Idle;
        }
        &session.phase
    }

    /// Tear down rooms that stayed empty past the grace period
    pub async fn reap_idle_rooms(&self) -> usize {
        self.rooms.reap_idle(self.config.empty_room_grace).await
    }

    /// (rooms, connections)
    pub fn stats(&self) -> (usize, usize) {
        (self.rooms.room_count(), self.registry.connection_count())
    }

    fn reply(&self, session: &Session, msg: ServerMessage) {
        self.registry.deliver(session.connection_id, msg);
    }

    fn announce_departure(&self, departure: &Departure) {
        if departure.room_closed {
            debug!(
                "Room {} closed with the departure of {}",
                departure.room_id, departure.user_id
            );
            return;
        }
        self.registry.broadcast(
            &departure.remaining,
            &ServerMessage::MemberLeft {
                room_id: departure.room_id.clone(),
                user_id: departure.user_id.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::protocol::ErrorCode;
    use crate::test_utils::{TestClient, chat, join, leave, test_supervisor, vote};
    use std::time::Duration;

    #[tokio::test]
    async fn test_session_phases() {
        let supervisor = test_supervisor();
        let mut client = TestClient::connect(&supervisor);
        assert_eq!(client.session.phase, SessionPhase::Connecting);

        client
            .send(
                &supervisor,
                ClientMessage::Authenticate {
                    user_id: "alice".to_string(),
                    seq: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(client.session.phase, SessionPhase::Authenticated);

        client.send(&supervisor, join("r", "alice")).await.unwrap();
        assert_eq!(client.session.phase, SessionPhase::InRoom("r".to_string()));

        client.send(&supervisor, leave("r", "alice")).await.unwrap();
        assert_eq!(client.session.phase, SessionPhase::Idle);

        supervisor.disconnect(&mut client.session).await;
        assert_eq!(client.session.phase, SessionPhase::Disconnected);
        assert_eq!(supervisor.stats().1, 0);
    }

    #[tokio::test]
    async fn test_first_event_binds_identity() {
        let supervisor = test_supervisor();
        let mut client = TestClient::connect(&supervisor);

        client.send(&supervisor, join("r", "alice")).await.unwrap();
        assert_eq!(client.session.user_id.as_deref(), Some("alice"));
        assert_eq!(
            supervisor
                .registry()
                .user_of(client.session.connection_id)
                .as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_identity_change_is_fatal() {
        let supervisor = test_supervisor();
        let mut client = TestClient::connect(&supervisor);

        client.send(&supervisor, join("r", "alice")).await.unwrap();
        client.drain();

        let result = client.send(&supervisor, chat("r", "bob", "hi")).await;
        assert!(matches!(result, Err(ref e) if e.is_fatal()));
        let frames = client.drain();
        assert!(frames.iter().any(|f| matches!(
            f,
            ServerMessage::Error { code: ErrorCode::DuplicateBinding, .. }
        )));
    }

    #[tokio::test]
    async fn test_join_notifies_room() {
        let supervisor = test_supervisor();
        let mut alice = TestClient::connect(&supervisor);
        let mut bob = TestClient::connect(&supervisor);

        alice.send(&supervisor, join("r", "alice")).await.unwrap();
        alice.drain();
        bob.send(&supervisor, join("r", "bob")).await.unwrap();

        let bob_frames = bob.drain();
        assert!(bob_frames.iter().any(|f| matches!(
            f,
            ServerMessage::RoomJoined { members, refreshed: false, .. } if members == &["alice", "bob"]
        )));
        assert!(alice.drain().iter().any(|f| matches!(
            f,
            ServerMessage::MemberJoined { user_id, .. } if user_id == "bob"
        )));
    }

    #[tokio::test]
    async fn test_rejoin_emits_refresh_without_duplicate() {
        let supervisor = test_supervisor();
        let mut alice = TestClient::connect(&supervisor);
        let mut bob = TestClient::connect(&supervisor);

        alice.send(&supervisor, join("r", "alice")).await.unwrap();
        bob.send(&supervisor, join("r", "bob")).await.unwrap();
        alice.drain();
        bob.drain();

        bob.send(&supervisor, join("r", "bob")).await.unwrap();

        assert!(alice.drain().iter().any(|f| matches!(
            f,
            ServerMessage::MemberRefreshed { user_id, .. } if user_id == "bob"
        )));
        assert!(bob.drain().iter().any(|f| matches!(
            f,
            ServerMessage::RoomJoined { refreshed: true, members, .. } if members.len() == 2
        )));
    }

    #[tokio::test]
    async fn test_chat_rejected_for_non_member_with_error_frame() {
        let supervisor = test_supervisor();
        let mut alice = TestClient::connect(&supervisor);

        alice
            .send(&supervisor, chat("r", "alice", "hello?"))
            .await
            .unwrap();

        let frames = alice.drain();
        assert!(frames.iter().any(|f| matches!(
            f,
            ServerMessage::Error { code: ErrorCode::NotAMember, seq: Some(1), .. }
        )));
    }

    #[tokio::test]
    async fn test_leave_twice_acks_noop() {
        let supervisor = test_supervisor();
        let mut alice = TestClient::connect(&supervisor);
        alice.send(&supervisor, join("r", "alice")).await.unwrap();
        alice.drain();

        alice.send(&supervisor, leave("r", "alice")).await.unwrap();
        alice.send(&supervisor, leave("r", "alice")).await.unwrap();
        alice.send(&supervisor, leave("never", "alice")).await.unwrap();

        let noops: Vec<bool> = alice
            .drain()
            .into_iter()
            .filter_map(|f| match f {
                ServerMessage::Ack { noop, .. } => Some(noop),
                _ => None,
            })
            .collect();
        assert_eq!(noops, vec![false, true, true]);
    }

    #[tokio::test]
    async fn test_vote_broadcast_to_all_members() {
        let supervisor = test_supervisor();
        let mut alice = TestClient::connect(&supervisor);
        let mut bob = TestClient::connect(&supervisor);
        alice.send(&supervisor, join("r", "alice")).await.unwrap();
        bob.send(&supervisor, join("r", "bob")).await.unwrap();
        alice.drain();
        bob.drain();

        alice.send(&supervisor, vote("r", "alice", "MCQ")).await.unwrap();

        for frames in [alice.drain(), bob.drain()] {
            assert!(frames.iter().any(|f| matches!(
                f,
                ServerMessage::VoteUpdate { tally, .. } if tally.get("MCQ") == Some(&1)
            )));
        }
    }

    #[tokio::test]
    async fn test_disconnect_evicts_and_notifies() {
        let supervisor = test_supervisor();
        let mut alice = TestClient::connect(&supervisor);
        let mut bob = TestClient::connect(&supervisor);
        alice.send(&supervisor, join("r", "alice")).await.unwrap();
        bob.send(&supervisor, join("r", "bob")).await.unwrap();
        alice.drain();

        supervisor.disconnect(&mut bob.session).await;

        assert!(alice.drain().iter().any(|f| matches!(
            f,
            ServerMessage::MemberLeft { user_id, .. } if user_id == "bob"
        )));
        assert_eq!(
            supervisor.rooms().snapshot("r").await.unwrap().members,
            vec!["alice"]
        );
        assert_eq!(supervisor.membership().room_of("bob").await, None);
    }

    #[tokio::test]
    async fn test_reconnect_requires_explicit_join() {
        let supervisor = test_supervisor();
        let mut first = TestClient::connect(&supervisor);
        first.send(&supervisor, join("r", "drop_user")).await.unwrap();
        supervisor.disconnect(&mut first.session).await;

        let mut second = TestClient::connect(&supervisor);
        second
            .send(
                &supervisor,
                ClientMessage::Authenticate {
                    user_id: "drop_user".to_string(),
                    seq: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(supervisor.membership().room_of("drop_user").await, None);

        second.send(&supervisor, join("r", "drop_user")).await.unwrap();
        assert_eq!(
            supervisor.membership().room_of("drop_user").await.as_deref(),
            Some("r")
        );
    }

    #[tokio::test]
    async fn test_reap_idle_rooms_after_grace() {
        let supervisor = Arc::new(SessionSupervisor::new(RoomConfig {
            empty_room_grace: Duration::from_millis(10),
            ..RoomConfig::default()
        }));
        let mut alice = TestClient::connect(&supervisor);
        alice.send(&supervisor, join("r", "alice")).await.unwrap();
        alice.send(&supervisor, leave("r", "alice")).await.unwrap();

        assert_eq!(supervisor.stats().0, 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(supervisor.reap_idle_rooms().await, 1);
        assert_eq!(supervisor.stats().0, 0);
    }

    #[tokio::test]
    async fn test_phase_follows_membership_moved_by_other_connection() {
        let supervisor = test_supervisor();
        let mut laptop = TestClient::connect(&supervisor);
        let mut phone = TestClient::connect(&supervisor);

        laptop.send(&supervisor, join("a", "alice")).await.unwrap();
        phone.send(&supervisor, join("b", "alice")).await.unwrap();

        assert_eq!(
            supervisor.sync_phase(&mut laptop.session).await,
            &SessionPhase::Idle
        );
        assert_eq!(
            supervisor.sync_phase(&mut phone.session).await,
            &SessionPhase::InRoom("b".to_string())
        );

        // Taking over the same room also moves ownership
        laptop.send(&supervisor, join("b", "alice")).await.unwrap();
        assert_eq!(laptop.session.phase, SessionPhase::InRoom("b".to_string()));
        assert_eq!(
            supervisor.sync_phase(&mut phone.session).await,
            &SessionPhase::Idle
        );
    }

    #[tokio::test]
    async fn test_rate_limited_events_are_answered_and_skipped() {
        let supervisor = SessionSupervisor::new(RoomConfig {
            rate_limit: RateLimitConfig {
                max_events: 2,
                window: Duration::from_secs(60),
                ..RateLimitConfig::default()
            },
            ..RoomConfig::default()
        });
        let mut alice = TestClient::connect(&supervisor);
        alice.send(&supervisor, join("r", "alice")).await.unwrap();
        alice.send(&supervisor, chat("r", "alice", "one")).await.unwrap();
        alice.drain();

        alice.send(&supervisor, chat("r", "alice", "two")).await.unwrap();

        let frames = alice.drain();
        assert!(frames.iter().any(|f| matches!(
            f,
            ServerMessage::Error { code: ErrorCode::RateLimited, seq: Some(1), .. }
        )));
        assert!(!frames.iter().any(|f| matches!(f, ServerMessage::Ack { .. })));
        assert_eq!(supervisor.rooms().snapshot("r").await.unwrap().chat_len, 1);
    }

    #[tokio::test]
    async fn test_burst_bans_connection_only() {
        let supervisor = SessionSupervisor::new(RoomConfig {
            rate_limit: RateLimitConfig {
                max_events: 100,
                burst_limit: 3,
                ..RateLimitConfig::default()
            },
            ..RoomConfig::default()
        });
        let mut noisy = TestClient::connect(&supervisor);
        let mut calm = TestClient::connect(&supervisor);

        for _ in 0..3 {
            noisy
                .send(&supervisor, ClientMessage::Ping { seq: None })
                .await
                .unwrap();
        }
        noisy.drain();
        noisy.send(&supervisor, join("r", "noisy")).await.unwrap();

        assert!(noisy.drain().iter().any(|f| matches!(
            f,
            ServerMessage::Error { code: ErrorCode::RateLimited, .. }
        )));
        assert_eq!(supervisor.membership().room_of("noisy").await, None);

        calm.send(&supervisor, join("r", "calm")).await.unwrap();
        assert_eq!(
            supervisor.membership().room_of("calm").await.as_deref(),
            Some("r")
        );
    }

    #[tokio::test]
    async fn test_throttled_vote_and_filtered_chat_codes() {
        let supervisor = test_supervisor();
        let mut alice = TestClient::connect(&supervisor);
        alice.send(&supervisor, join("r", "alice")).await.unwrap();
        alice.send(&supervisor, vote("r", "alice", "MCQ")).await.unwrap();
        alice.drain();

        alice.send(&supervisor, vote("r", "alice", "MCQ")).await.unwrap();
        alice
            .send(&supervisor, chat("r", "alice", "what the fuck"))
            .await
            .unwrap();

        let codes: Vec<ErrorCode> = alice
            .drain()
            .into_iter()
            .filter_map(|f| match f {
                ServerMessage::Error { code, .. } => Some(code),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec![ErrorCode::VoteThrottled, ErrorCode::MessageRejected]);
        assert_eq!(
            supervisor.votes().tally("r").await.unwrap().get("MCQ"),
            Some(&1)
        );
    }
}
