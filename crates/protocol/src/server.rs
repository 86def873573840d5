use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deck::DeckType;
use crate::error::ErrorKind;
use crate::ids::{ConnectionId, RoomCode, SessionId, StoryId, UserId};
use crate::views::{
    ParticipantView, RevealTrigger, RoomSettings, RoomSnapshot, SessionView, StoryView,
    VoteStatistics, VoteView,
};

/// Closed set of server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Connected {
        connection_id: ConnectionId,
    },
    RoomCreated {
        user_id: UserId,
        snapshot: RoomSnapshot,
    },
    RoomJoined {
        user_id: UserId,
        snapshot: RoomSnapshot,
    },
    RoomSnapshot {
        snapshot: RoomSnapshot,
    },
    UserJoined {
        participant: ParticipantView,
    },
    UserLeft {
        user_id: UserId,
    },
    UsersUpdated {
        participants: Vec<ParticipantView>,
    },
    RoomUpdated {
        settings: RoomSettings,
    },
    RoomArchived {
        room_id: RoomCode,
    },
    StoryCreated {
        story: StoryView,
    },
    StoryUpdated {
        story: StoryView,
    },
    StoryDeleted {
        story_id: StoryId,
    },
    VotingSessionStarted {
        session: SessionView,
    },
    VoteSubmitted {
        story_id: StoryId,
        session_id: SessionId,
        voter_id: UserId,
        voter_name: String,
        vote_count: usize,
        total_users: usize,
    },
    VotesRevealed {
        story_id: StoryId,
        session_id: SessionId,
        round: u32,
        trigger: RevealTrigger,
        votes: Vec<VoteView>,
        statistics: Option<VoteStatistics>,
    },
    VotesHidden {
        story_id: StoryId,
        session_id: SessionId,
        round: u32,
    },
    TimerStarted {
        story_id: StoryId,
        session_id: SessionId,
        started_at: DateTime<Utc>,
        duration: u32,
    },
    TimerStopped {
        story_id: StoryId,
        session_id: SessionId,
    },
    VotingReset {
        story_id: StoryId,
        session_id: SessionId,
        round: u32,
    },
    DeckTypeChanged {
        story_id: StoryId,
        session_id: SessionId,
        deck_type: DeckType,
    },
    VotingSessionEnded {
        story_id: StoryId,
        session_id: SessionId,
        final_estimate: Option<String>,
        story: StoryView,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Pong,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::RoomCreated { .. } => "room_created",
            ServerEvent::RoomJoined { .. } => "room_joined",
            ServerEvent::RoomSnapshot { .. } => "room_snapshot",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::UsersUpdated { .. } => "users_updated",
            ServerEvent::RoomUpdated { .. } => "room_updated",
            ServerEvent::RoomArchived { .. } => "room_archived",
            ServerEvent::StoryCreated { .. } => "story_created",
            ServerEvent::StoryUpdated { .. } => "story_updated",
            ServerEvent::StoryDeleted { .. } => "story_deleted",
            ServerEvent::VotingSessionStarted { .. } => "voting_session_started",
            ServerEvent::VoteSubmitted { .. } => "vote_submitted",
            ServerEvent::VotesRevealed { .. } => "votes_revealed",
            ServerEvent::VotesHidden { .. } => "votes_hidden",
            ServerEvent::TimerStarted { .. } => "timer_started",
            ServerEvent::TimerStopped { .. } => "timer_stopped",
            ServerEvent::VotingReset { .. } => "voting_reset",
            ServerEvent::DeckTypeChanged { .. } => "deck_type_changed",
            ServerEvent::VotingSessionEnded { .. } => "voting_session_ended",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }
}
