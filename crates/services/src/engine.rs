//! Session coordinator.
//!
//! Owns the registry, the dispatcher and the persister. Every room action
//! locks its room, validates, mutates, enqueues writes and broadcasts before
//! the lock is released, so all members observe one room's events in the
//! order they were produced. Nothing awaits while a room lock is held.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pointroom_config::Settings;
use pointroom_db::models::{Story, Vote};
use pointroom_protocol::client::{
    AssignRole, ChangeDeckType, CreateRoom, CreateStory, EndVotingSession, JoinRoom, RevealVotes,
    StartTimer, StartVotingSession, StoryRef, SubmitVote, UpdateStory,
};
use pointroom_protocol::{
    ConnectionId, CorrelationId, DeckType, RevealTrigger, RoomCode, RoomSettings,
    RoomSettingsPatch, RoomSummary, ServerEvent, ServerFrame, SessionId, StoryStatus, UserId,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::{ConnSender, ConnectionStorage, Dispatcher};
use crate::error::{ServiceError, ServiceResult};
use crate::persist::{Persister, WriteOp};
use crate::registry::{CodeGenerator, NewRoom, RandomCodes, Registry, RoomHandle};
use crate::room::RoomState;
use crate::session::{LiveSession, TimerGuard};
use crate::store::DocumentStore;
use crate::view;
use crate::votes::{self, VoteBook};

/// Identity of the connection performing a room-scoped action.
#[derive(Debug, Clone)]
pub struct Caller {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub room: RoomCode,
    pub correlation_id: Option<CorrelationId>,
}

pub struct Engine {
    registry: Registry,
    dispatcher: Dispatcher,
    persister: Persister,
    store: Arc<dyn DocumentStore>,
    default_deck: DeckType,
    default_timer_secs: u32,
    me: Weak<Engine>,
}

fn frame(event: ServerEvent, correlation_id: Option<CorrelationId>) -> ServerFrame {
    ServerFrame::with_correlation(event, correlation_id)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Engine {
    pub fn new(store: Arc<dyn DocumentStore>, settings: &Settings) -> ServiceResult<Arc<Self>> {
        Self::with_codes(store, settings, Box::new(RandomCodes))
    }

    /// Must be called inside a Tokio runtime; spawns the persister task.
    pub fn with_codes(
        store: Arc<dyn DocumentStore>,
        settings: &Settings,
        codes: Box<dyn CodeGenerator>,
    ) -> ServiceResult<Arc<Self>> {
        let default_deck = settings.voting.default_deck.parse::<DeckType>()?;
        let storage = Arc::new(ConnectionStorage::new());
        let persister = Persister::spawn(store.clone(), settings.voting.critical_write_attempts);

        Ok(Arc::new_cyclic(|me| Self {
            registry: Registry::new(&settings.rooms, codes),
            dispatcher: Dispatcher::new(storage),
            persister,
            store,
            default_deck,
            default_timer_secs: settings.voting.default_timer_secs,
            me: me.clone(),
        }))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn storage(&self) -> &Arc<ConnectionStorage> {
        self.dispatcher.storage()
    }

    fn room(&self, code: &RoomCode) -> ServiceResult<RoomHandle> {
        self.registry.get(code)
    }

    /// Refreshes activity and queues the room document.
    fn touched(&self, room: &mut RoomState, now: DateTime<Utc>) {
        room.touch(now);
        self.persister.enqueue(WriteOp::Room(room.room.clone()));
    }

    // ── Connections ─────────────────────────────────────────────

    /// Registers a connection and greets it with its id.
    pub fn connect(&self, sender: ConnSender) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        self.storage().add(connection_id, sender);
        self.dispatcher.send_to_connection(
            &connection_id,
            &ServerFrame::new(ServerEvent::Connected { connection_id }),
        );
        connection_id
    }

    /// Drops the connection. Its user goes offline once no other connection
    /// of theirs remains in the room; votes are untouched.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        if let Some((user_id, code)) = self.storage().identity(&connection_id) {
            self.depart(connection_id, &user_id, &code, None);
        }
        self.storage().remove(&connection_id);
    }

    /// Identity bound to the connection, required for room-scoped actions.
    pub fn identify(
        &self,
        connection_id: ConnectionId,
        correlation_id: Option<CorrelationId>,
    ) -> ServiceResult<Caller> {
        let (user_id, room) = self
            .storage()
            .identity(&connection_id)
            .ok_or(ServiceError::NotAuthenticated)?;
        Ok(Caller {
            connection_id,
            user_id,
            room,
            correlation_id,
        })
    }

    pub fn send_error(
        &self,
        connection_id: &ConnectionId,
        correlation_id: Option<CorrelationId>,
        error: &ServiceError,
    ) {
        let event = ServerEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        };
        self.dispatcher
            .send_to_connection(connection_id, &frame(event, correlation_id));
    }

    pub fn pong(&self, connection_id: &ConnectionId, correlation_id: Option<CorrelationId>) {
        self.dispatcher
            .send_to_connection(connection_id, &frame(ServerEvent::Pong, correlation_id));
    }

    /// Unbinds the connection from its room and marks the user offline when
    /// it was their last connection there.
    fn depart(
        &self,
        connection_id: ConnectionId,
        user_id: &str,
        code: &RoomCode,
        correlation_id: Option<CorrelationId>,
    ) {
        let Ok(handle) = self.room(code) else {
            self.storage().unbind(&connection_id);
            return;
        };
        let mut room = handle.lock();
        self.storage().unbind(&connection_id);
        if self.storage().user_connection_count(code, user_id) > 0 {
            debug!(room = %code, user_id, %connection_id, "Connection closed, user still present");
            return;
        }
        let now = Utc::now();
        if !room.leave(user_id, now) {
            return;
        }
        self.persister.enqueue(WriteOp::Room(room.room.clone()));
        self.dispatcher.broadcast(
            code,
            &frame(
                ServerEvent::UserLeft {
                    user_id: user_id.to_string(),
                },
                correlation_id,
            ),
        );
        self.dispatcher.broadcast(
            code,
            &frame(
                ServerEvent::UsersUpdated {
                    participants: view::participants(&room),
                },
                correlation_id,
            ),
        );
        info!(room = %code, user_id, "User left room");
    }

    // ── Rooms ───────────────────────────────────────────────────

    pub fn create_room(
        &self,
        connection_id: ConnectionId,
        correlation_id: Option<CorrelationId>,
        request: CreateRoom,
    ) -> ServiceResult<RoomCode> {
        if request.name.trim().is_empty() {
            return Err(ServiceError::Validation("Room name is required".to_string()));
        }
        let previous = self.storage().identity(&connection_id);
        let host_id = non_blank(request.user_id)
            .or_else(|| previous.as_ref().map(|(user_id, _)| user_id.clone()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let host_name = non_blank(request.display_name).unwrap_or_else(|| host_id.clone());

        if let Some((user_id, code)) = &previous {
            self.depart(connection_id, user_id, code, correlation_id);
        }

        let mut settings = RoomSettings {
            deck_type: self.default_deck,
            timer_duration: self.default_timer_secs,
            ..RoomSettings::default()
        };
        if let Some(patch) = &request.settings {
            settings.merge(patch);
        }

        let handle = self.registry.create_room(
            NewRoom {
                host_id: host_id.clone(),
                host_name,
                name: request.name,
                description: non_blank(request.description),
                settings,
            },
            Utc::now(),
        )?;
        let room = handle.lock();
        let code = room.code.clone();
        self.storage()
            .bind(connection_id, host_id.clone(), code.clone());
        self.persister.enqueue(WriteOp::Room(room.room.clone()));
        let snapshot = view::snapshot(&room, Some(&host_id));
        self.dispatcher.send_to_connection(
            &connection_id,
            &frame(
                ServerEvent::RoomCreated {
                    user_id: host_id.clone(),
                    snapshot,
                },
                correlation_id,
            ),
        );
        info!(room = %code, user_id = %host_id, %connection_id, "Room created");
        Ok(code)
    }

    pub fn join_room(
        &self,
        connection_id: ConnectionId,
        correlation_id: Option<CorrelationId>,
        request: JoinRoom,
    ) -> ServiceResult<RoomCode> {
        let (code, handle) = self.registry.lookup(&request.room_id)?;
        let user_id = request.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(ServiceError::Validation("userId is required".to_string()));
        }
        let display_name = request.effective_display_name();

        if let Some((previous_user, previous_room)) = self.storage().identity(&connection_id) {
            if previous_room != code || previous_user != user_id {
                self.depart(connection_id, &previous_user, &previous_room, correlation_id);
            }
        }

        let mut room = handle.lock();
        let now = Utc::now();
        let outcome = room.join(&user_id, display_name, request.role, now)?;
        self.storage()
            .bind(connection_id, user_id.clone(), code.clone());
        self.persister.enqueue(WriteOp::Room(room.room.clone()));

        self.dispatcher.send_to_connection(
            &connection_id,
            &frame(
                ServerEvent::RoomJoined {
                    user_id: user_id.clone(),
                    snapshot: view::snapshot(&room, Some(&user_id)),
                },
                correlation_id,
            ),
        );
        self.dispatcher.broadcast_except(
            &code,
            Some(connection_id),
            &frame(
                ServerEvent::UserJoined {
                    participant: view::participant(&outcome.participant),
                },
                correlation_id,
            ),
        );
        self.dispatcher.broadcast(
            &code,
            &frame(
                ServerEvent::UsersUpdated {
                    participants: view::participants(&room),
                },
                correlation_id,
            ),
        );
        info!(
            room = %code,
            %user_id,
            %connection_id,
            rejoined = outcome.rejoined,
            "User joined room"
        );
        Ok(code)
    }

    pub fn leave_room(&self, caller: &Caller) -> ServiceResult<()> {
        self.depart(
            caller.connection_id,
            &caller.user_id,
            &caller.room,
            caller.correlation_id,
        );
        // The leaver is unbound by now; acknowledge directly.
        self.dispatcher.send_to_connection(
            &caller.connection_id,
            &frame(
                ServerEvent::UserLeft {
                    user_id: caller.user_id.clone(),
                },
                caller.correlation_id,
            ),
        );
        Ok(())
    }

    pub fn request_snapshot(&self, caller: &Caller) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let room = handle.lock();
        room.member(&caller.user_id)?;
        self.dispatcher.send_to_connection(
            &caller.connection_id,
            &frame(
                ServerEvent::RoomSnapshot {
                    snapshot: view::snapshot(&room, Some(&caller.user_id)),
                },
                caller.correlation_id,
            ),
        );
        Ok(())
    }

    pub fn update_room_settings(
        &self,
        caller: &Caller,
        patch: RoomSettingsPatch,
    ) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut room = handle.lock();
        let now = Utc::now();
        room.update_settings(&caller.user_id, &patch, now)?;
        self.touched(&mut room, now);
        self.dispatcher.broadcast(
            &caller.room,
            &frame(
                ServerEvent::RoomUpdated {
                    settings: room.room.settings.clone(),
                },
                caller.correlation_id,
            ),
        );
        info!(room = %caller.room, user_id = %caller.user_id, "Room settings updated");
        Ok(())
    }

    pub fn archive_room(&self, caller: &Caller) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut room = handle.lock();
        room.archive(&caller.user_id, Utc::now())?;
        self.announce_archived(&mut room, caller.correlation_id);
        info!(room = %caller.room, user_id = %caller.user_id, "Room archived by host");
        Ok(())
    }

    fn announce_archived(&self, room: &mut RoomState, correlation_id: Option<CorrelationId>) {
        self.persister.enqueue(WriteOp::Room(room.room.clone()));
        for live in room.sessions.iter().filter(|s| s.record.is_live()) {
            self.persister.enqueue(WriteOp::Session(live.record.clone()));
        }
        self.dispatcher.broadcast(
            &room.code,
            &frame(
                ServerEvent::RoomArchived {
                    room_id: room.code.clone(),
                },
                correlation_id,
            ),
        );
    }

    pub fn assign_role(&self, caller: &Caller, request: AssignRole) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut room = handle.lock();
        let now = Utc::now();
        let participant = room.assign_role(&caller.user_id, &request.user_id, request.role, now)?;
        self.touched(&mut room, now);
        self.dispatcher.broadcast(
            &caller.room,
            &frame(
                ServerEvent::UsersUpdated {
                    participants: view::participants(&room),
                },
                caller.correlation_id,
            ),
        );
        info!(
            room = %caller.room,
            user_id = %participant.user_id,
            role = ?participant.role,
            "Role assigned"
        );
        Ok(())
    }

    /// Public summary for join pages.
    pub fn room_summary(&self, raw_code: &str) -> ServiceResult<RoomSummary> {
        let (_, handle) = self.registry.lookup(raw_code)?;
        let room = handle.lock();
        Ok(view::summary(&room))
    }

    // ── Stories ─────────────────────────────────────────────────

    pub fn create_story(&self, caller: &Caller, request: CreateStory) -> ServiceResult<()> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(ServiceError::Validation("Story title is required".to_string()));
        }
        let handle = self.room(&caller.room)?;
        let mut room = handle.lock();
        room.ensure_active()?;
        room.require_admin(&caller.user_id, "create stories")?;

        let now = Utc::now();
        let at = bson::DateTime::from_chrono(now);
        let story = Story {
            id: Uuid::new_v4(),
            room_id: caller.room.to_string(),
            title,
            description: non_blank(request.description),
            status: StoryStatus::Pending,
            final_points: None,
            position: room.next_position(),
            last_session_id: None,
            created_at: at,
            updated_at: at,
        };
        room.stories.push(story.clone());
        self.persister.enqueue(WriteOp::Story(story.clone()));
        self.touched(&mut room, now);
        self.dispatcher.broadcast(
            &caller.room,
            &frame(
                ServerEvent::StoryCreated {
                    story: view::story(&story),
                },
                caller.correlation_id,
            ),
        );
        debug!(room = %caller.room, story_id = %story.id, "Story created");
        Ok(())
    }

    pub fn update_story(&self, caller: &Caller, request: UpdateStory) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut room = handle.lock();
        room.ensure_active()?;
        room.require_admin(&caller.user_id, "edit stories")?;

        let now = Utc::now();
        let story = room.story_mut(request.story_id)?;
        if let Some(title) = request.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(ServiceError::Validation("Story title is required".to_string()));
            }
            story.title = title;
        }
        if let Some(description) = request.description {
            story.description = non_blank(Some(description));
        }
        story.updated_at = bson::DateTime::from_chrono(now);
        let story = story.clone();

        self.persister.enqueue(WriteOp::Story(story.clone()));
        self.touched(&mut room, now);
        self.dispatcher.broadcast(
            &caller.room,
            &frame(
                ServerEvent::StoryUpdated {
                    story: view::story(&story),
                },
                caller.correlation_id,
            ),
        );
        Ok(())
    }

    /// Removes a story. A session still in progress is ended first.
    pub fn delete_story(&self, caller: &Caller, request: StoryRef) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut room = handle.lock();
        room.ensure_active()?;
        room.require_admin(&caller.user_id, "delete stories")?;
        room.story(request.story_id)?;

        let now = Utc::now();
        if let Some(idx) = room.live_session_index(request.story_id) {
            let live = &mut room.sessions[idx];
            live.end(None, None, now)?;
            self.persister.enqueue(WriteOp::Session(live.record.clone()));
        }
        room.sessions
            .retain(|s| s.record.story_id != request.story_id);
        room.stories.retain(|s| s.id != request.story_id);

        self.persister.enqueue(WriteOp::DeleteStory(request.story_id));
        self.touched(&mut room, now);
        self.dispatcher.broadcast(
            &caller.room,
            &frame(
                ServerEvent::StoryDeleted {
                    story_id: request.story_id,
                },
                caller.correlation_id,
            ),
        );
        debug!(room = %caller.room, story_id = %request.story_id, "Story deleted");
        Ok(())
    }

    // ── Voting sessions ─────────────────────────────────────────

    pub fn start_voting_session(
        &self,
        caller: &Caller,
        request: StartVotingSession,
    ) -> ServiceResult<SessionId> {
        let handle = self.room(&caller.room)?;
        let mut room = handle.lock();
        room.ensure_active()?;
        room.require_admin(&caller.user_id, "start voting")?;
        room.story(request.story_id)?;
        if room.live_session_index(request.story_id).is_some() {
            return Err(ServiceError::Conflict(format!(
                "Story {} already has a voting session in progress",
                request.story_id
            )));
        }

        let now = Utc::now();
        let deck = request.deck_type.unwrap_or(room.room.settings.deck_type);
        let duration = request
            .timer_duration
            .unwrap_or(room.room.settings.timer_duration);
        let live = LiveSession::open(
            &room.code,
            request.story_id,
            deck,
            duration,
            caller.user_id.clone(),
            now,
        );
        let session_id = live.id();
        let session_view = view::session(&room.code, &live, None);
        self.persister.enqueue(WriteOp::Session(live.record.clone()));
        room.sessions.push(live);

        let story = room.story_mut(request.story_id)?;
        story.status = StoryStatus::Voting;
        story.last_session_id = Some(session_id);
        story.updated_at = bson::DateTime::from_chrono(now);
        let story = story.clone();
        self.persister.enqueue(WriteOp::Story(story.clone()));
        self.touched(&mut room, now);

        self.dispatcher.broadcast(
            &caller.room,
            &frame(
                ServerEvent::StoryUpdated {
                    story: view::story(&story),
                },
                caller.correlation_id,
            ),
        );
        self.dispatcher.broadcast(
            &caller.room,
            &frame(
                ServerEvent::VotingSessionStarted {
                    session: session_view,
                },
                caller.correlation_id,
            ),
        );
        info!(room = %caller.room, %session_id, story_id = %request.story_id, deck = %deck, "Voting session started");
        Ok(session_id)
    }

    /// Records a vote and reveals the round once the number of voters matches
    /// the number of eligible online participants. Outside an open round the
    /// vote is ignored.
    pub fn submit_vote(&self, caller: &Caller, request: SubmitVote) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut guard = handle.lock();
        let room = &mut *guard;
        room.ensure_active()?;
        let member = room.member(&caller.user_id)?.clone();
        if !member.role.can_vote() {
            return Err(ServiceError::Authorization("Spectators cannot vote".to_string()));
        }
        room.story(request.story_id)?;

        let Some(idx) = room
            .live_session_index(request.story_id)
            .filter(|&i| room.sessions[i].accepts_votes())
        else {
            debug!(room = %caller.room, user_id = %caller.user_id, "Vote outside an open round ignored");
            return Ok(());
        };

        let value = request.value.trim().to_string();
        let deck = room.sessions[idx].record.deck_type;
        if !deck.contains(&value) {
            return Err(ServiceError::Validation(format!(
                "{value:?} is not a card in the {deck} deck"
            )));
        }

        let now = Utc::now();
        let live = &mut room.sessions[idx];
        let session_id = live.id();
        let round = live.round();
        let vote = Vote {
            id: Vote::key(session_id, round, &caller.user_id),
            session_id,
            room_id: caller.room.to_string(),
            round,
            user_id: caller.user_id.clone(),
            display_name: member.display_name.clone(),
            value,
            submitted_at: bson::DateTime::from_chrono(now),
        };
        let recorded = live.votes.record(vote.clone());
        let vote_count = live.votes.count(round);
        self.persister.enqueue(WriteOp::Vote(vote));

        let total_users = room.eligible_voters().count();
        self.touched(room, now);
        self.dispatcher.broadcast(
            &caller.room,
            &frame(
                ServerEvent::VoteSubmitted {
                    story_id: request.story_id,
                    session_id,
                    voter_id: caller.user_id.clone(),
                    voter_name: member.display_name,
                    vote_count,
                    total_users,
                },
                caller.correlation_id,
            ),
        );
        debug!(room = %caller.room, %session_id, user_id = %caller.user_id, round, ?recorded, vote_count, total_users, "Vote recorded");

        if room.room.settings.auto_reveal_votes && votes::is_complete(vote_count, total_users) {
            self.reveal_locked(room, idx, RevealTrigger::AllVoted, caller.correlation_id)?;
        }
        Ok(())
    }

    /// OPEN → REVEALED and broadcast of the full round. Returns false when
    /// another trigger already revealed it.
    fn reveal_locked(
        &self,
        room: &mut RoomState,
        idx: usize,
        trigger: RevealTrigger,
        correlation_id: Option<CorrelationId>,
    ) -> ServiceResult<bool> {
        let live = &mut room.sessions[idx];
        if !live.reveal()? {
            return Ok(false);
        }
        let current = live.current_votes();
        let event = ServerEvent::VotesRevealed {
            story_id: live.record.story_id,
            session_id: live.record.id,
            round: live.record.round,
            trigger,
            votes: view::votes(current),
            statistics: votes::statistics(current),
        };
        let session_id = live.record.id;
        self.persister.enqueue(WriteOp::Session(live.record.clone()));
        self.dispatcher
            .broadcast(&room.code, &frame(event, correlation_id));
        info!(room = %room.code, %session_id, ?trigger, "Votes revealed");
        Ok(true)
    }

    pub fn reveal_votes(&self, caller: &Caller, request: RevealVotes) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut guard = handle.lock();
        let room = &mut *guard;
        room.ensure_active()?;
        let action = if request.revealed { "reveal votes" } else { "hide votes" };
        room.require_admin(&caller.user_id, action)?;
        let idx = room.require_live_session(request.story_id)?;

        if request.revealed {
            self.reveal_locked(room, idx, RevealTrigger::Manual, caller.correlation_id)?;
            return Ok(());
        }

        let live = &mut room.sessions[idx];
        if live.hide()? {
            let event = ServerEvent::VotesHidden {
                story_id: live.record.story_id,
                session_id: live.record.id,
                round: live.record.round,
            };
            self.persister.enqueue(WriteOp::Session(live.record.clone()));
            self.dispatcher
                .broadcast(&caller.room, &frame(event, caller.correlation_id));
        }
        Ok(())
    }

    pub fn start_timer(&self, caller: &Caller, request: StartTimer) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut guard = handle.lock();
        let room = &mut *guard;
        room.ensure_active()?;
        room.require_admin(&caller.user_id, "start the timer")?;
        let idx = room.require_live_session(request.story_id)?;

        let now = Utc::now();
        let live = &mut room.sessions[idx];
        let duration = request.duration.unwrap_or(live.record.timer_duration);
        live.start_timer(duration, now)?;
        self.arm_timer(&room.code, live, Duration::from_secs(u64::from(duration)));

        let event = ServerEvent::TimerStarted {
            story_id: request.story_id,
            session_id: live.id(),
            started_at: now,
            duration,
        };
        self.persister.enqueue(WriteOp::Session(live.record.clone()));
        self.touched(room, now);
        self.dispatcher
            .broadcast(&caller.room, &frame(event, caller.correlation_id));
        debug!(room = %caller.room, duration, "Timer started");
        Ok(())
    }

    pub fn stop_timer(&self, caller: &Caller, request: StoryRef) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut guard = handle.lock();
        let room = &mut *guard;
        room.ensure_active()?;
        room.require_admin(&caller.user_id, "stop the timer")?;
        let idx = room.require_live_session(request.story_id)?;

        let live = &mut room.sessions[idx];
        if live.stop_timer()? {
            let event = ServerEvent::TimerStopped {
                story_id: request.story_id,
                session_id: live.id(),
            };
            self.persister.enqueue(WriteOp::Session(live.record.clone()));
            self.dispatcher
                .broadcast(&caller.room, &frame(event, caller.correlation_id));
        }
        Ok(())
    }

    /// Arms a one-shot timer task for the session. The task holds only a
    /// weak engine reference and the generation it was armed with.
    fn arm_timer(&self, code: &RoomCode, live: &mut LiveSession, after: Duration) {
        let generation = live.arm_timer();
        let session_id = live.id();
        let engine = self.me.clone();
        let code = code.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(engine) = engine.upgrade() {
                engine.expire_timer(&code, session_id, generation);
            }
        });
        live.timer = Some(TimerGuard::new(handle));
    }

    /// Timer expiry. Reveals the round unless the timer was stopped,
    /// re-armed or beaten by another reveal in the meantime.
    pub fn expire_timer(&self, code: &RoomCode, session_id: SessionId, generation: u64) {
        let Ok(handle) = self.room(code) else {
            return;
        };
        let mut guard = handle.lock();
        let room = &mut *guard;
        if !room.is_active() {
            return;
        }
        let Some(idx) = room.session_index_by_id(session_id) else {
            return;
        };
        if !room.sessions[idx].timer_is_current(generation) {
            debug!(room = %code, %session_id, generation, "Stale timer ignored");
            return;
        }
        room.sessions[idx].fire_timer();
        if let Err(e) = self.reveal_locked(room, idx, RevealTrigger::Timer, None) {
            warn!(room = %code, %session_id, %e, "Timer reveal failed");
        }
    }

    pub fn reset_voting(&self, caller: &Caller, request: StoryRef) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut guard = handle.lock();
        let room = &mut *guard;
        room.ensure_active()?;
        room.require_admin(&caller.user_id, "reset voting")?;
        let idx = room.require_live_session(request.story_id)?;

        let now = Utc::now();
        let live = &mut room.sessions[idx];
        let round = live.reset()?;
        let event = ServerEvent::VotingReset {
            story_id: request.story_id,
            session_id: live.id(),
            round,
        };
        self.persister.enqueue(WriteOp::Session(live.record.clone()));
        self.touched(room, now);
        self.dispatcher
            .broadcast(&caller.room, &frame(event, caller.correlation_id));
        info!(room = %caller.room, round, "Voting reset");
        Ok(())
    }

    pub fn change_deck_type(&self, caller: &Caller, request: ChangeDeckType) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let mut guard = handle.lock();
        let room = &mut *guard;
        room.ensure_active()?;
        room.require_admin(&caller.user_id, "change the deck")?;
        let idx = room.require_live_session(request.story_id)?;

        let live = &mut room.sessions[idx];
        live.change_deck(request.deck_type)?;
        let event = ServerEvent::DeckTypeChanged {
            story_id: request.story_id,
            session_id: live.id(),
            deck_type: request.deck_type,
        };
        self.persister.enqueue(WriteOp::Session(live.record.clone()));
        self.dispatcher
            .broadcast(&caller.room, &frame(event, caller.correlation_id));
        Ok(())
    }

    /// Ends the session and records the estimate on its story. Both writes
    /// are critical: the call waits for them after the room lock is released
    /// and reports a storage failure to the caller.
    pub async fn end_voting_session(
        &self,
        caller: &Caller,
        request: EndVotingSession,
    ) -> ServiceResult<()> {
        let handle = self.room(&caller.room)?;
        let (session_write, story_write) = {
            let mut guard = handle.lock();
            let room = &mut *guard;
            room.ensure_active()?;
            room.require_admin(&caller.user_id, "end the session")?;
            let idx = room.require_live_session(request.story_id)?;

            let now = Utc::now();
            let estimate = non_blank(request.final_estimate);
            let live = &mut room.sessions[idx];
            live.end(estimate.clone(), request.confidence, now)?;
            let session_id = live.id();
            let session_write = self
                .persister
                .enqueue_critical(WriteOp::Session(live.record.clone()));

            let story = room.story_mut(request.story_id)?;
            match &estimate {
                Some(points) => {
                    story.final_points = Some(points.clone());
                    story.status = StoryStatus::Voted;
                }
                None => story.status = StoryStatus::Pending,
            }
            story.updated_at = bson::DateTime::from_chrono(now);
            let story = story.clone();
            let story_write = self
                .persister
                .enqueue_critical(WriteOp::Story(story.clone()));
            self.touched(room, now);

            self.dispatcher.broadcast(
                &caller.room,
                &frame(
                    ServerEvent::VotingSessionEnded {
                        story_id: request.story_id,
                        session_id,
                        final_estimate: estimate,
                        story: view::story(&story),
                    },
                    caller.correlation_id,
                ),
            );
            info!(room = %caller.room, %session_id, "Voting session ended");
            (session_write, story_write)
        };

        session_write.wait().await?;
        story_write.wait().await?;
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Archives rooms idle past the inactivity window.
    pub fn sweep_inactive(&self, now: DateTime<Utc>) -> Vec<RoomCode> {
        let mut archived = Vec::new();
        for handle in self.registry.handles() {
            let mut room = handle.lock();
            if !room.is_idle(now) {
                continue;
            }
            room.mark_archived(now);
            self.announce_archived(&mut room, None);
            info!(room = %room.code, "Idle room archived");
            archived.push(room.code.clone());
        }
        archived
    }

    /// Drops rooms archived longer than the retention window, freeing their
    /// codes and deleting their documents.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<RoomCode> {
        let retention = self.registry.retention();
        let mut purged = Vec::new();
        for handle in self.registry.handles() {
            let expired = {
                let room = handle.lock();
                room.is_expired(now, retention).then(|| room.code.clone())
            };
            let Some(code) = expired else {
                continue;
            };
            self.registry.remove(&code);
            self.storage().unbind_room(&code);
            self.persister.enqueue(WriteOp::DeleteRoom(code.to_string()));
            info!(room = %code, "Archived room purged");
            purged.push(code);
        }
        purged
    }

    /// Rebuilds rooms from the store at startup. Everyone starts offline;
    /// running timers are re-armed for their remaining time, or fire at once
    /// when their deadline has passed.
    pub async fn recover(&self) -> ServiceResult<usize> {
        let rooms = self.store.load_rooms().await?;
        let now = Utc::now();
        let mut restored = 0;

        for mut room in rooms {
            let code = match RoomCode::parse(&room.id) {
                Ok(code) => code,
                Err(e) => {
                    warn!(id = %room.id, %e, "Skipping stored room with an invalid code");
                    continue;
                }
            };
            let stories = self.store.load_stories(&room.id).await?;
            let records = self.store.load_sessions(&room.id).await?;
            let mut by_session: HashMap<SessionId, Vec<Vote>> = HashMap::new();
            for vote in self.store.load_votes(&room.id).await? {
                by_session.entry(vote.session_id).or_default().push(vote);
            }

            for participant in &mut room.participants {
                participant.is_online = false;
            }
            let mut state = RoomState::new(code.clone(), room, self.registry.idle_window());
            state.stories = stories;
            state.stories.sort_by_key(|s| s.position);
            state.sessions = records
                .into_iter()
                .map(|record| {
                    let votes = by_session.remove(&record.id).unwrap_or_default();
                    LiveSession::restore(record, VoteBook::from_votes(votes))
                })
                .collect();

            let Some(handle) = self.registry.restore(state) else {
                debug!(room = %code, "Room already present, skipping stored copy");
                continue;
            };
            let mut room = handle.lock();
            self.resume_timers(&mut room, now);
            restored += 1;
        }

        info!(restored, backend = self.store.name(), "Rooms recovered");
        Ok(restored)
    }

    fn resume_timers(&self, room: &mut RoomState, now: DateTime<Utc>) {
        if !room.is_active() {
            return;
        }
        for idx in 0..room.sessions.len() {
            let live = &mut room.sessions[idx];
            if !live.accepts_votes() {
                continue;
            }
            let Some(deadline) = live.record.timer_deadline_millis() else {
                continue;
            };
            let remaining = deadline - now.timestamp_millis();
            if remaining > 0 {
                let after = Duration::from_millis(remaining.unsigned_abs());
                self.arm_timer(&room.code, live, after);
            } else {
                live.fire_timer();
                if let Err(e) = self.reveal_locked(room, idx, RevealTrigger::Timer, None) {
                    warn!(room = %room.code, %e, "Reveal of an expired timer failed");
                }
            }
        }
    }
}
