use bson::DateTime;
use pointroom_protocol::{Role, RoomSettings, RoomStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// The six-character room code.
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub host_id: String,
    /// Ordered by join time; leaving flips `is_online` instead of removing.
    #[serde(default)]
    pub participants: Vec<Participant>,
    pub settings: RoomSettings,
    pub status: RoomStatus,
    pub created_at: DateTime,
    pub last_activity: DateTime,
    pub expires_at: DateTime,
    pub archived_at: Option<DateTime>,
}

impl Room {
    pub const COLLECTION: &'static str = "rooms";

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        self.participant(user_id).map(|p| p.role)
    }

    pub fn online_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_online).count()
    }

    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub is_online: bool,
    pub joined_at: DateTime,
    pub last_activity: DateTime,
}
