use bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// `"{session_id}:{round}:{user_id}"`, so a resubmission upserts the
    /// same document.
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: Uuid,
    pub room_id: String,
    pub round: u32,
    pub user_id: String,
    pub display_name: String,
    pub value: String,
    pub submitted_at: DateTime,
}

impl Vote {
    pub const COLLECTION: &'static str = "votes";

    pub fn key(session_id: Uuid, round: u32, user_id: &str) -> String {
        format!("{session_id}:{round}:{user_id}")
    }
}
