//! Read models sent to clients. Vote values appear only where the recipient
//! is allowed to see them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::deck::DeckType;
use crate::ids::{RoomCode, SessionId, StoryId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Facilitator,
    Participant,
    Spectator,
}

impl Role {
    /// Host and facilitators may drive sessions and stories.
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Host | Role::Facilitator)
    }

    pub fn can_vote(self) -> bool {
        !matches!(self, Role::Spectator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Pending,
    Voting,
    Voted,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    None,
    Open,
    Revealed,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealTrigger {
    Manual,
    AllVoted,
    Timer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub deck_type: DeckType,
    /// Seconds.
    pub timer_duration: u32,
    pub allow_spectators: bool,
    pub auto_reveal_votes: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            deck_type: DeckType::Fibonacci,
            timer_duration: 60,
            allow_spectators: false,
            auto_reveal_votes: true,
        }
    }
}

impl RoomSettings {
    pub fn merge(&mut self, patch: &RoomSettingsPatch) {
        if let Some(deck) = patch.deck_type {
            self.deck_type = deck;
        }
        if let Some(secs) = patch.timer_duration {
            self.timer_duration = secs;
        }
        if let Some(allow) = patch.allow_spectators {
            self.allow_spectators = allow;
        }
        if let Some(auto) = patch.auto_reveal_votes {
            self.auto_reveal_votes = auto;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettingsPatch {
    #[serde(default)]
    pub deck_type: Option<DeckType>,
    #[serde(default)]
    #[validate(range(min = 5, max = 3600))]
    pub timer_duration: Option<u32>,
    #[serde(default)]
    pub allow_spectators: Option<bool>,
    #[serde(default)]
    pub auto_reveal_votes: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub is_online: bool,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: RoomCode,
    pub name: String,
    pub description: Option<String>,
    pub host_id: UserId,
    pub settings: RoomSettings,
    pub status: RoomStatus,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryView {
    pub id: StoryId,
    pub title: String,
    pub description: Option<String>,
    pub status: StoryStatus,
    pub final_points: Option<String>,
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub user_id: UserId,
    pub display_name: String,
    pub value: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatistics {
    /// Number of numeric votes the figures are computed over.
    pub count: usize,
    pub mean: f64,
    /// `mean` rounded to one decimal place.
    pub mean_rounded: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub consensus: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: SessionId,
    pub story_id: StoryId,
    pub room_id: RoomCode,
    pub deck_type: DeckType,
    pub round: u32,
    pub state: SessionState,
    pub timer_started_at: Option<DateTime<Utc>>,
    pub timer_duration: u32,
    pub created_by: UserId,
    /// Users with a vote in the current round, in submission order.
    pub voted: Vec<UserId>,
    /// The recipient's own current-round vote.
    pub my_vote: Option<String>,
    /// Populated once the round is revealed.
    pub votes: Option<Vec<VoteView>>,
    pub statistics: Option<VoteStatistics>,
    pub final_estimate: Option<String>,
}

/// Everything a client needs to rebuild its mirror after (re)joining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room: RoomView,
    pub participants: Vec<ParticipantView>,
    pub stories: Vec<StoryView>,
    /// Live sessions plus the most recent ended one per story.
    pub sessions: Vec<SessionView>,
}

/// Public summary served over HTTP for join pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomCode,
    pub name: String,
    pub status: RoomStatus,
    pub participant_count: usize,
    pub online_count: usize,
}
