use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::deck::DeckType;
use crate::error::ProtocolError;
use crate::ids::{StoryId, UserId};
use crate::views::{Role, RoomSettingsPatch};

/// Closed set of client → server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    CreateRoom(CreateRoom),
    JoinRoom(JoinRoom),
    LeaveRoom,
    RequestSnapshot,
    UpdateRoomSettings(RoomSettingsPatch),
    ArchiveRoom,
    AssignRole(AssignRole),
    CreateStory(CreateStory),
    UpdateStory(UpdateStory),
    DeleteStory(StoryRef),
    StartVotingSession(StartVotingSession),
    SubmitVote(SubmitVote),
    StartTimer(StartTimer),
    StopTimer(StoryRef),
    RevealVotes(RevealVotes),
    ResetVoting(StoryRef),
    ChangeDeckType(ChangeDeckType),
    EndVotingSession(EndVotingSession),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub settings: Option<RoomSettingsPatch>,
    /// Adopted as the host id when the connection is not yet identified.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub user_id: Option<UserId>,
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    #[validate(length(min = 1, max = 64))]
    pub user_id: UserId,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl JoinRoom {
    /// `displayName` wins over `name`; the user id is the last resort.
    pub fn effective_display_name(&self) -> String {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.user_id)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignRole {
    #[validate(length(min = 1, max = 64))]
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateStory {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStory {
    pub story_id: StoryId,
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StoryRef {
    pub story_id: StoryId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartVotingSession {
    pub story_id: StoryId,
    #[serde(default)]
    pub deck_type: Option<DeckType>,
    /// Seconds, like `start_timer`; falls back to the room setting.
    #[serde(default)]
    #[validate(range(min = 1, max = 3600))]
    pub timer_duration: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVote {
    pub story_id: StoryId,
    #[validate(length(min = 1, max = 16))]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartTimer {
    pub story_id: StoryId,
    /// Seconds; falls back to the session's configured duration.
    #[serde(default)]
    #[validate(range(min = 1, max = 3600))]
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RevealVotes {
    pub story_id: StoryId,
    #[serde(default = "default_revealed")]
    pub revealed: bool,
}

fn default_revealed() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDeckType {
    pub story_id: StoryId,
    pub deck_type: DeckType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EndVotingSession {
    pub story_id: StoryId,
    #[serde(default)]
    #[validate(length(min = 1, max = 16))]
    pub final_estimate: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: Option<f64>,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::CreateRoom(_) => "create_room",
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom => "leave_room",
            ClientEvent::RequestSnapshot => "request_snapshot",
            ClientEvent::UpdateRoomSettings(_) => "update_room_settings",
            ClientEvent::ArchiveRoom => "archive_room",
            ClientEvent::AssignRole(_) => "assign_role",
            ClientEvent::CreateStory(_) => "create_story",
            ClientEvent::UpdateStory(_) => "update_story",
            ClientEvent::DeleteStory(_) => "delete_story",
            ClientEvent::StartVotingSession(_) => "start_voting_session",
            ClientEvent::SubmitVote(_) => "submit_vote",
            ClientEvent::StartTimer(_) => "start_timer",
            ClientEvent::StopTimer(_) => "stop_timer",
            ClientEvent::RevealVotes(_) => "reveal_votes",
            ClientEvent::ResetVoting(_) => "reset_voting",
            ClientEvent::ChangeDeckType(_) => "change_deck_type",
            ClientEvent::EndVotingSession(_) => "end_voting_session",
            ClientEvent::Ping => "ping",
        }
    }

    /// Events that only make sense once the connection has joined a room.
    pub fn is_room_scoped(&self) -> bool {
        !matches!(
            self,
            ClientEvent::CreateRoom(_) | ClientEvent::JoinRoom(_) | ClientEvent::Ping
        )
    }

    /// Field-level checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let result = match self {
            ClientEvent::CreateRoom(p) => p.validate(),
            ClientEvent::JoinRoom(p) => p.validate(),
            ClientEvent::UpdateRoomSettings(p) => p.validate(),
            ClientEvent::AssignRole(p) => p.validate(),
            ClientEvent::CreateStory(p) => p.validate(),
            ClientEvent::UpdateStory(p) => p.validate(),
            ClientEvent::DeleteStory(p)
            | ClientEvent::StopTimer(p)
            | ClientEvent::ResetVoting(p) => p.validate(),
            ClientEvent::StartVotingSession(p) => p.validate(),
            ClientEvent::SubmitVote(p) => p.validate(),
            ClientEvent::StartTimer(p) => p.validate(),
            ClientEvent::RevealVotes(p) => p.validate(),
            ClientEvent::ChangeDeckType(p) => p.validate(),
            ClientEvent::EndVotingSession(p) => p.validate(),
            ClientEvent::LeaveRoom
            | ClientEvent::RequestSnapshot
            | ClientEvent::ArchiveRoom
            | ClientEvent::Ping => Ok(()),
        };
        result.map_err(|e| ProtocolError::InvalidPayload {
            event: self.name().to_string(),
            reason: e.to_string(),
        })
    }
}
