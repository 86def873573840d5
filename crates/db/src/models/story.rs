use bson::DateTime;
use pointroom_protocol::StoryStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub room_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: StoryStatus,
    pub final_points: Option<String>,
    #[serde(default)]
    pub position: u32,
    pub last_session_id: Option<Uuid>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Story {
    pub const COLLECTION: &'static str = "stories";
}
