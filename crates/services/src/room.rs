use chrono::{DateTime, TimeDelta, Utc};
use pointroom_db::models::{Participant, Room, Story};
use pointroom_protocol::{Role, RoomCode, SessionId, StoryId};

use crate::error::{ServiceError, ServiceResult};
use crate::session::LiveSession;

/// Everything the engine knows about one room. Guarded by the room's mutex;
/// every mutation and every broadcast for the room happens under it.
pub struct RoomState {
    pub code: RoomCode,
    pub room: Room,
    /// Ordered by `position`.
    pub stories: Vec<Story>,
    /// Ordered by creation; ended sessions stay for history.
    pub sessions: Vec<LiveSession>,
    pub(crate) idle_window: TimeDelta,
}

impl RoomState {
    pub fn new(code: RoomCode, room: Room, idle_window: TimeDelta) -> Self {
        Self {
            code,
            room,
            stories: Vec::new(),
            sessions: Vec::new(),
            idle_window,
        }
    }

    pub fn is_active(&self) -> bool {
        self.room.is_active()
    }

    pub fn ensure_active(&self) -> ServiceResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ServiceError::Conflict(format!("Room {} is archived", self.code)))
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.room.last_activity = bson::DateTime::from_chrono(now);
        self.room.expires_at = bson::DateTime::from_chrono(now + self.idle_window);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.room.last_activity.to_chrono()
    }

    // ── Members ─────────────────────────────────────────────────

    pub fn member(&self, user_id: &str) -> ServiceResult<&Participant> {
        self.room.participant(user_id).ok_or_else(|| {
            ServiceError::Authorization(format!("{user_id} is not a member of room {}", self.code))
        })
    }

    pub fn require_admin(&self, user_id: &str, action: &str) -> ServiceResult<&Participant> {
        let member = self.member(user_id)?;
        if member.role.is_admin() {
            Ok(member)
        } else {
            Err(ServiceError::admin_only(action))
        }
    }

    pub fn require_host(&self, user_id: &str, action: &str) -> ServiceResult<&Participant> {
        let member = self.member(user_id)?;
        if member.role == Role::Host {
            Ok(member)
        } else {
            Err(ServiceError::host_only(action))
        }
    }

    /// Online members whose votes count toward completion.
    pub fn eligible_voters(&self) -> impl Iterator<Item = &str> {
        self.room
            .participants
            .iter()
            .filter(|p| p.is_online && p.role.can_vote())
            .map(|p| p.user_id.as_str())
    }

    // ── Stories ─────────────────────────────────────────────────

    pub fn story(&self, story_id: StoryId) -> ServiceResult<&Story> {
        self.stories
            .iter()
            .find(|s| s.id == story_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Story {story_id} not found")))
    }

    pub fn story_mut(&mut self, story_id: StoryId) -> ServiceResult<&mut Story> {
        self.stories
            .iter_mut()
            .find(|s| s.id == story_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Story {story_id} not found")))
    }

    pub fn next_position(&self) -> u32 {
        self.stories.iter().map(|s| s.position + 1).max().unwrap_or(0)
    }

    // ── Sessions ────────────────────────────────────────────────

    /// Index of the newest session for a story, live or ended.
    pub fn latest_session_index(&self, story_id: StoryId) -> Option<usize> {
        self.sessions
            .iter()
            .rposition(|s| s.record.story_id == story_id)
    }

    /// Index of the story's open or revealed session.
    pub fn live_session_index(&self, story_id: StoryId) -> Option<usize> {
        self.latest_session_index(story_id)
            .filter(|&i| self.sessions[i].record.is_live())
    }

    /// The story's live session; `NotFound` when the story is unknown or has
    /// no session in progress.
    pub fn require_live_session(&self, story_id: StoryId) -> ServiceResult<usize> {
        self.story(story_id)?;
        self.live_session_index(story_id).ok_or_else(|| {
            ServiceError::NotFound(format!("No voting session in progress for story {story_id}"))
        })
    }

    pub fn session_index_by_id(&self, session_id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.record.id == session_id)
    }

    /// Stops every pending timer, e.g. when the room is archived.
    pub fn cancel_timers(&mut self) {
        for session in &mut self.sessions {
            session.cancel_timer();
        }
    }
}
