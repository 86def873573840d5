use bson::DateTime;
use pointroom_protocol::{DeckType, SessionState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingSession {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub story_id: Uuid,
    pub room_id: String,
    pub deck_type: DeckType,
    pub round: u32,
    pub state: SessionState,
    pub timer_started_at: Option<DateTime>,
    /// Seconds.
    pub timer_duration: u32,
    pub created_by: String,
    pub created_at: DateTime,
    pub ended_at: Option<DateTime>,
    pub final_estimate: Option<String>,
    pub confidence: Option<f64>,
}

impl VotingSession {
    pub const COLLECTION: &'static str = "voting_sessions";

    /// Open or revealed; an ended session never comes back.
    pub fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Open | SessionState::Revealed)
    }

    /// Millisecond deadline of the running timer, if any.
    pub fn timer_deadline_millis(&self) -> Option<i64> {
        self.timer_started_at
            .map(|started| started.timestamp_millis() + i64::from(self.timer_duration) * 1000)
    }
}
