//! Optimistic client state.
//!
//! Local mutations are applied to the mirror right away and remembered in
//! the pending queue under the correlation id sent with the request. The
//! first server frame echoing that id settles the operation: an `error`
//! rolls it back, anything else confirms it. Snapshots replace the mirror
//! and drop whatever is still pending.

use std::time::Duration;

use chrono::Utc;
use pointroom_protocol::client::{CreateRoom, CreateStory, JoinRoom, SubmitVote, UpdateStory};
use pointroom_protocol::{
    ClientEvent, ClientFrame, CorrelationId, ErrorKind, RoomCode, RoomSettingsPatch,
    ServerEvent, ServerFrame, SessionState, StoryId, StoryStatus, StoryView, UserId,
};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::mirror::Mirror;
use crate::pending::{PendingOp, PendingQueue};

pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum RollbackReason {
    Rejected { kind: ErrorKind, message: String },
    TimedOut,
}

/// What changed after a frame, a timeout sweep or a connection event.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Connected,
    Disconnected,
    Applied { event: &'static str },
    Confirmed { correlation_id: CorrelationId },
    RolledBack {
        correlation_id: CorrelationId,
        reason: RollbackReason,
    },
    /// Pending operations dropped in favour of a fresh snapshot.
    Superseded { dropped: usize },
    /// A server error not tied to a pending operation.
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone)]
struct Identity {
    room: RoomCode,
    user_id: UserId,
    display_name: String,
}

#[derive(Debug)]
pub struct Reconciler {
    mirror: Mirror,
    pending: PendingQueue,
    identity: Option<Identity>,
    display_name: Option<String>,
}

impl Reconciler {
    pub fn new(pending_timeout: Duration) -> Self {
        Self {
            mirror: Mirror::default(),
            pending: PendingQueue::new(pending_timeout),
            identity: None,
            display_name: None,
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn room(&self) -> Option<&RoomCode> {
        self.identity.as_ref().map(|i| &i.room)
    }

    /// Wraps a non-optimistic request in a correlated frame.
    pub fn request(&self, event: ClientEvent) -> ClientFrame {
        ClientFrame::correlated(event, Uuid::new_v4())
    }

    pub fn create_room(
        &mut self,
        name: String,
        user_id: Option<UserId>,
        display_name: String,
        settings: Option<RoomSettingsPatch>,
    ) -> ClientFrame {
        self.display_name = Some(display_name.clone());
        self.request(ClientEvent::CreateRoom(CreateRoom {
            name,
            description: None,
            settings,
            user_id,
            display_name: Some(display_name),
        }))
    }

    pub fn join_room(&mut self, room: &str, user_id: UserId, display_name: String) -> ClientFrame {
        self.display_name = Some(display_name.clone());
        self.request(ClientEvent::JoinRoom(JoinRoom {
            room_id: room.to_string(),
            user_id,
            name: None,
            display_name: Some(display_name),
            role: None,
        }))
    }

    pub fn leave_room(&mut self) -> ClientFrame {
        self.identity = None;
        self.pending.clear();
        self.mirror.clear();
        self.request(ClientEvent::LeaveRoom)
    }

    /// Frames that restore membership after a reconnect: re-join the last
    /// room, then ask for a fresh snapshot.
    pub fn rejoin_frames(&self) -> Vec<ClientFrame> {
        let Some(identity) = &self.identity else {
            return Vec::new();
        };
        vec![
            self.request(ClientEvent::JoinRoom(JoinRoom {
                room_id: identity.room.to_string(),
                user_id: identity.user_id.clone(),
                name: None,
                display_name: Some(identity.display_name.clone()),
                role: None,
            })),
            self.request(ClientEvent::RequestSnapshot),
        ]
    }

    /// Optimistically records the user's card for the story's open round.
    pub fn vote(&mut self, story_id: StoryId, value: &str, now: Instant) -> ClientResult<ClientFrame> {
        let me = self.mirror.user_id.clone().ok_or(ClientError::NotInRoom)?;
        if self.mirror.story(story_id).is_none() {
            return Err(ClientError::UnknownStory(story_id));
        }
        let session = self
            .mirror
            .session_mut(story_id)
            .filter(|s| s.state == SessionState::Open)
            .ok_or(ClientError::NoOpenRound(story_id))?;
        if !session.deck_type.contains(value) {
            return Err(ClientError::InvalidCard {
                value: value.to_string(),
                deck: session.deck_type,
            });
        }

        let was_listed = session.voted.contains(&me);
        let op = PendingOp::Vote {
            story_id,
            session_id: session.id,
            previous: session.my_vote.replace(value.to_string()),
            was_listed,
        };
        if !was_listed {
            session.voted.push(me);
        }

        let frame = self.request(ClientEvent::SubmitVote(SubmitVote {
            story_id,
            value: value.to_string(),
        }));
        self.track(&frame, op, now);
        Ok(frame)
    }

    /// Inserts a placeholder story until the server assigns the real one.
    pub fn create_story(
        &mut self,
        title: String,
        description: Option<String>,
        now: Instant,
    ) -> ClientResult<ClientFrame> {
        if self.mirror.room.is_none() {
            return Err(ClientError::NotInRoom);
        }
        let frame = self.request(ClientEvent::CreateStory(CreateStory {
            title: title.clone(),
            description: description.clone(),
        }));
        let placeholder = frame.correlation_id.unwrap_or_else(Uuid::new_v4);
        let position = self
            .mirror
            .stories
            .iter()
            .map(|s| s.position + 1)
            .max()
            .unwrap_or(0);
        self.mirror.upsert_story(StoryView {
            id: placeholder,
            title,
            description,
            status: StoryStatus::Pending,
            final_points: None,
            position,
            created_at: Utc::now(),
        });
        self.track(&frame, PendingOp::CreateStory { placeholder }, now);
        Ok(frame)
    }

    pub fn update_story(
        &mut self,
        story_id: StoryId,
        title: Option<String>,
        description: Option<String>,
        now: Instant,
    ) -> ClientResult<ClientFrame> {
        let previous = self
            .mirror
            .story(story_id)
            .cloned()
            .ok_or(ClientError::UnknownStory(story_id))?;
        let mut edited = previous.clone();
        if let Some(title) = &title {
            edited.title = title.clone();
        }
        if let Some(description) = &description {
            edited.description = Some(description.clone()).filter(|d| !d.is_empty());
        }
        self.mirror.upsert_story(edited);

        let frame = self.request(ClientEvent::UpdateStory(UpdateStory {
            story_id,
            title,
            description,
        }));
        self.track(&frame, PendingOp::UpdateStory { previous }, now);
        Ok(frame)
    }

    fn track(&mut self, frame: &ClientFrame, op: PendingOp, now: Instant) {
        if let Some(id) = frame.correlation_id {
            self.pending.insert(id, op, now);
        }
    }

    /// Folds one server frame into local state.
    pub fn apply(&mut self, frame: ServerFrame) -> Vec<Update> {
        let mut updates = Vec::new();

        if let ServerEvent::Error { kind, message } = &frame.event {
            let op = frame.correlation_id.and_then(|id| {
                self.pending.take(&id).map(|op| (id, op))
            });
            match op {
                Some((correlation_id, op)) => {
                    op.rollback(&mut self.mirror);
                    debug!(%correlation_id, ?kind, "Optimistic change rejected");
                    updates.push(Update::RolledBack {
                        correlation_id,
                        reason: RollbackReason::Rejected {
                            kind: *kind,
                            message: message.clone(),
                        },
                    });
                }
                None => updates.push(Update::Error {
                    kind: *kind,
                    message: message.clone(),
                }),
            }
            return updates;
        }

        if matches!(
            frame.event,
            ServerEvent::RoomCreated { .. }
                | ServerEvent::RoomJoined { .. }
                | ServerEvent::RoomSnapshot { .. }
        ) {
            let dropped = self.pending.clear();
            if dropped > 0 {
                updates.push(Update::Superseded { dropped });
            }
        }

        if let Some(correlation_id) = frame.correlation_id {
            if let Some(op) = self.pending.take(&correlation_id) {
                if let PendingOp::CreateStory { placeholder } = op {
                    self.mirror.remove_story(placeholder);
                }
                updates.push(Update::Confirmed { correlation_id });
            }
        }

        match &frame.event {
            ServerEvent::RoomCreated { user_id, snapshot }
            | ServerEvent::RoomJoined { user_id, snapshot } => {
                self.identity = Some(Identity {
                    room: snapshot.room.id.clone(),
                    user_id: user_id.clone(),
                    display_name: snapshot
                        .participants
                        .iter()
                        .find(|p| &p.user_id == user_id)
                        .map(|p| p.display_name.clone())
                        .or_else(|| self.display_name.clone())
                        .unwrap_or_else(|| user_id.clone()),
                });
            }
            ServerEvent::RoomArchived { .. } => self.identity = None,
            _ => {}
        }

        if self.mirror.apply(&frame.event) {
            updates.push(Update::Applied {
                event: frame.event.name(),
            });
        }
        updates
    }

    /// Rolls back operations the server never confirmed in time.
    pub fn expire(&mut self, now: Instant) -> Vec<Update> {
        self.pending
            .take_expired(now)
            .into_iter()
            .map(|(correlation_id, op)| {
                op.rollback(&mut self.mirror);
                debug!(%correlation_id, "Optimistic change timed out");
                Update::RolledBack {
                    correlation_id,
                    reason: RollbackReason::TimedOut,
                }
            })
            .collect()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointroom_protocol::{
        DeckType, ParticipantView, RevealTrigger, Role, RoomSettings, RoomSnapshot, RoomStatus,
        RoomView, SessionView,
    };

    fn snapshot(story_id: StoryId, session_id: Uuid) -> RoomSnapshot {
        let now = Utc::now();
        let code = RoomCode::parse("ABC123").unwrap();
        RoomSnapshot {
            room: RoomView {
                id: code.clone(),
                name: "Sprint".to_string(),
                description: None,
                host_id: "alice".to_string(),
                settings: RoomSettings::default(),
                status: RoomStatus::Active,
                last_activity: now,
                expires_at: now,
            },
            participants: vec![ParticipantView {
                user_id: "bob".to_string(),
                display_name: "Bob".to_string(),
                role: Role::Participant,
                is_online: true,
                joined_at: now,
                last_activity: now,
            }],
            stories: vec![StoryView {
                id: story_id,
                title: "Login".to_string(),
                description: None,
                status: StoryStatus::Voting,
                final_points: None,
                position: 0,
                created_at: now,
            }],
            sessions: vec![SessionView {
                id: session_id,
                story_id,
                room_id: code,
                deck_type: DeckType::Fibonacci,
                round: 1,
                state: SessionState::Open,
                timer_started_at: None,
                timer_duration: 60,
                created_by: "alice".to_string(),
                voted: Vec::new(),
                my_vote: None,
                votes: None,
                statistics: None,
                final_estimate: None,
            }],
        }
    }

    fn joined() -> (Reconciler, StoryId, Uuid) {
        let story_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let mut r = Reconciler::default();
        r.apply(ServerFrame::new(ServerEvent::RoomJoined {
            user_id: "bob".to_string(),
            snapshot: snapshot(story_id, session_id),
        }));
        (r, story_id, session_id)
    }

    #[tokio::test]
    async fn confirmed_vote_stays() {
        let (mut r, story_id, session_id) = joined();
        let frame = r.vote(story_id, "5", Instant::now()).unwrap();
        let id = frame.correlation_id.unwrap();
        assert_eq!(r.mirror().session(story_id).unwrap().my_vote.as_deref(), Some("5"));

        let updates = r.apply(ServerFrame::with_correlation(
            ServerEvent::VoteSubmitted {
                story_id,
                session_id,
                voter_id: "bob".to_string(),
                voter_name: "Bob".to_string(),
                vote_count: 1,
                total_users: 2,
            },
            Some(id),
        ));
        assert_eq!(updates[0], Update::Confirmed { correlation_id: id });
        assert!(r.pending().is_empty());
        let session = r.mirror().session(story_id).unwrap();
        assert_eq!(session.my_vote.as_deref(), Some("5"));
        assert_eq!(session.voted, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn rejected_vote_restores_previous_value() {
        let (mut r, story_id, _) = joined();
        let first = r.vote(story_id, "3", Instant::now()).unwrap();
        r.pending.take(&first.correlation_id.unwrap());
        let second = r.vote(story_id, "8", Instant::now()).unwrap();

        let updates = r.apply(ServerFrame::with_correlation(
            ServerEvent::Error {
                kind: ErrorKind::TransientIo,
                message: "store down".to_string(),
            },
            second.correlation_id,
        ));
        assert!(matches!(
            updates[0],
            Update::RolledBack {
                reason: RollbackReason::Rejected { .. },
                ..
            }
        ));
        let session = r.mirror().session(story_id).unwrap();
        assert_eq!(session.my_vote.as_deref(), Some("3"));
        assert_eq!(session.voted, vec!["bob".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_vote_times_out() {
        let (mut r, story_id, _) = joined();
        r.vote(story_id, "13", Instant::now()).unwrap();

        assert!(r.expire(Instant::now()).is_empty());
        tokio::time::advance(DEFAULT_PENDING_TIMEOUT).await;
        let updates = r.expire(Instant::now());
        assert!(matches!(
            updates[0],
            Update::RolledBack {
                reason: RollbackReason::TimedOut,
                ..
            }
        ));
        let session = r.mirror().session(story_id).unwrap();
        assert!(session.my_vote.is_none());
        assert!(session.voted.is_empty());
    }

    #[tokio::test]
    async fn placeholder_story_is_replaced_by_server_copy() {
        let (mut r, _, _) = joined();
        let frame = r
            .create_story("Signup".to_string(), None, Instant::now())
            .unwrap();
        let placeholder = frame.correlation_id.unwrap();
        assert!(r.mirror().story(placeholder).is_some());

        let real = StoryView {
            id: Uuid::new_v4(),
            title: "Signup".to_string(),
            description: None,
            status: StoryStatus::Pending,
            final_points: None,
            position: 1,
            created_at: Utc::now(),
        };
        r.apply(ServerFrame::with_correlation(
            ServerEvent::StoryCreated { story: real.clone() },
            Some(placeholder),
        ));
        assert!(r.mirror().story(placeholder).is_none());
        assert_eq!(r.mirror().story(real.id), Some(&real));
        assert_eq!(r.mirror().stories.len(), 2);
    }

    #[tokio::test]
    async fn rejected_story_edit_is_undone() {
        let (mut r, story_id, _) = joined();
        let frame = r
            .update_story(story_id, Some("Renamed".to_string()), None, Instant::now())
            .unwrap();
        assert_eq!(r.mirror().story(story_id).unwrap().title, "Renamed");

        r.apply(ServerFrame::with_correlation(
            ServerEvent::Error {
                kind: ErrorKind::Authorization,
                message: "Only the host or a facilitator can edit stories".to_string(),
            },
            frame.correlation_id,
        ));
        assert_eq!(r.mirror().story(story_id).unwrap().title, "Login");
    }

    #[tokio::test]
    async fn snapshot_discards_pending_and_rejoin_targets_last_room() {
        let (mut r, story_id, session_id) = joined();
        r.vote(story_id, "5", Instant::now()).unwrap();

        let rejoin = r.rejoin_frames();
        assert_eq!(rejoin.len(), 2);
        match &rejoin[0].event {
            ClientEvent::JoinRoom(join) => {
                assert_eq!(join.room_id, "ABC123");
                assert_eq!(join.user_id, "bob");
            }
            other => panic!("expected join_room, got {other:?}"),
        }
        assert_eq!(rejoin[1].event, ClientEvent::RequestSnapshot);

        let updates = r.apply(ServerFrame::new(ServerEvent::RoomSnapshot {
            snapshot: snapshot(story_id, session_id),
        }));
        assert_eq!(updates[0], Update::Superseded { dropped: 1 });
        assert!(r.pending().is_empty());
        assert!(r.mirror().session(story_id).unwrap().my_vote.is_none());
    }

    #[tokio::test]
    async fn votes_need_an_open_round_and_a_valid_card() {
        let (mut r, story_id, session_id) = joined();
        assert!(matches!(
            r.vote(story_id, "XL", Instant::now()),
            Err(ClientError::InvalidCard { .. })
        ));
        r.apply(ServerFrame::new(ServerEvent::VotesRevealed {
            story_id,
            session_id,
            round: 1,
            trigger: RevealTrigger::Manual,
            votes: Vec::new(),
            statistics: None,
        }));
        assert!(matches!(
            r.vote(story_id, "5", Instant::now()),
            Err(ClientError::NoOpenRound(_))
        ));
    }
}
