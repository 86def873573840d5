//! Local copy of one room, kept in step with server events.

use std::collections::HashMap;

use pointroom_protocol::{
    ParticipantView, RoomSnapshot, RoomStatus, RoomView, ServerEvent, SessionId, SessionState,
    SessionView, StoryId, StoryView, UserId,
};

#[derive(Debug, Clone, Default)]
pub struct Mirror {
    pub user_id: Option<UserId>,
    pub room: Option<RoomView>,
    pub participants: Vec<ParticipantView>,
    /// Ordered by position.
    pub stories: Vec<StoryView>,
    /// Latest session per story.
    pub sessions: HashMap<StoryId, SessionView>,
}

impl Mirror {
    /// Replaces everything with an authoritative snapshot.
    pub fn load(&mut self, snapshot: RoomSnapshot) {
        self.room = Some(snapshot.room);
        self.participants = snapshot.participants;
        self.stories = snapshot.stories;
        self.stories.sort_by_key(|s| s.position);
        self.sessions = snapshot
            .sessions
            .into_iter()
            .map(|s| (s.story_id, s))
            .collect();
    }

    pub fn clear(&mut self) {
        *self = Mirror::default();
    }

    pub fn story(&self, story_id: StoryId) -> Option<&StoryView> {
        self.stories.iter().find(|s| s.id == story_id)
    }

    pub fn session(&self, story_id: StoryId) -> Option<&SessionView> {
        self.sessions.get(&story_id)
    }

    pub(crate) fn session_mut(&mut self, story_id: StoryId) -> Option<&mut SessionView> {
        self.sessions.get_mut(&story_id)
    }

    pub fn participant(&self, user_id: &str) -> Option<&ParticipantView> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub(crate) fn upsert_story(&mut self, story: StoryView) {
        match self.stories.iter_mut().find(|s| s.id == story.id) {
            Some(existing) => *existing = story,
            None => self.stories.push(story),
        }
        self.stories.sort_by_key(|s| s.position);
    }

    pub(crate) fn remove_story(&mut self, story_id: StoryId) {
        self.stories.retain(|s| s.id != story_id);
        self.sessions.remove(&story_id);
    }

    /// Applies one event. Returns false for events that carry no room state.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::RoomCreated { user_id, snapshot }
            | ServerEvent::RoomJoined { user_id, snapshot } => {
                self.user_id = Some(user_id.clone());
                self.load(snapshot.clone());
            }
            ServerEvent::RoomSnapshot { snapshot } => self.load(snapshot.clone()),
            ServerEvent::UserJoined { participant } => {
                match self
                    .participants
                    .iter_mut()
                    .find(|p| p.user_id == participant.user_id)
                {
                    Some(existing) => *existing = participant.clone(),
                    None => self.participants.push(participant.clone()),
                }
            }
            ServerEvent::UserLeft { user_id } => {
                if let Some(p) = self.participants.iter_mut().find(|p| &p.user_id == user_id) {
                    p.is_online = false;
                }
            }
            ServerEvent::UsersUpdated { participants } => {
                self.participants = participants.clone();
            }
            ServerEvent::RoomUpdated { settings } => {
                if let Some(room) = &mut self.room {
                    room.settings = settings.clone();
                }
            }
            ServerEvent::RoomArchived { .. } => {
                if let Some(room) = &mut self.room {
                    room.status = RoomStatus::Archived;
                }
            }
            ServerEvent::StoryCreated { story } | ServerEvent::StoryUpdated { story } => {
                self.upsert_story(story.clone());
            }
            ServerEvent::StoryDeleted { story_id } => self.remove_story(*story_id),
            ServerEvent::VotingSessionStarted { session } => {
                self.sessions.insert(session.story_id, session.clone());
            }
            ServerEvent::VoteSubmitted {
                story_id,
                session_id,
                voter_id,
                ..
            } => {
                if let Some(s) = self.current(*story_id, *session_id) {
                    if !s.voted.contains(voter_id) {
                        s.voted.push(voter_id.clone());
                    }
                }
            }
            ServerEvent::VotesRevealed {
                story_id,
                session_id,
                round,
                votes,
                statistics,
                ..
            } => {
                if let Some(s) = self.current(*story_id, *session_id) {
                    s.state = SessionState::Revealed;
                    s.round = *round;
                    s.timer_started_at = None;
                    s.votes = Some(votes.clone());
                    s.statistics = statistics.clone();
                }
            }
            ServerEvent::VotesHidden {
                story_id,
                session_id,
                ..
            } => {
                if let Some(s) = self.current(*story_id, *session_id) {
                    s.state = SessionState::Open;
                    s.votes = None;
                    s.statistics = None;
                }
            }
            ServerEvent::TimerStarted {
                story_id,
                session_id,
                started_at,
                duration,
            } => {
                if let Some(s) = self.current(*story_id, *session_id) {
                    s.timer_started_at = Some(*started_at);
                    s.timer_duration = *duration;
                }
            }
            ServerEvent::TimerStopped {
                story_id,
                session_id,
            } => {
                if let Some(s) = self.current(*story_id, *session_id) {
                    s.timer_started_at = None;
                }
            }
            ServerEvent::VotingReset {
                story_id,
                session_id,
                round,
            } => {
                if let Some(s) = self.current(*story_id, *session_id) {
                    s.state = SessionState::Open;
                    s.round = *round;
                    s.timer_started_at = None;
                    s.voted.clear();
                    s.my_vote = None;
                    s.votes = None;
                    s.statistics = None;
                }
            }
            ServerEvent::DeckTypeChanged {
                story_id,
                session_id,
                deck_type,
            } => {
                if let Some(s) = self.current(*story_id, *session_id) {
                    s.deck_type = *deck_type;
                }
            }
            ServerEvent::VotingSessionEnded {
                story_id,
                session_id,
                final_estimate,
                story,
            } => {
                if let Some(s) = self.current(*story_id, *session_id) {
                    s.state = SessionState::Ended;
                    s.timer_started_at = None;
                    s.final_estimate = final_estimate.clone();
                }
                self.upsert_story(story.clone());
            }
            ServerEvent::Connected { .. } | ServerEvent::Error { .. } | ServerEvent::Pong => {
                return false;
            }
        }
        true
    }

    /// The mirrored session for the story, if it is the one the event is about.
    fn current(&mut self, story_id: StoryId, session_id: SessionId) -> Option<&mut SessionView> {
        self.sessions
            .get_mut(&story_id)
            .filter(|s| s.id == session_id)
    }
}
