use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pointroom_db::models::{Room, Story, Vote, VotingSession};
use uuid::Uuid;

use super::{DaoError, DaoResult, DocumentStore};

#[derive(Default)]
struct Collections {
    rooms: HashMap<String, Room>,
    stories: HashMap<Uuid, Story>,
    sessions: HashMap<Uuid, VotingSession>,
    votes: HashMap<String, Vote>,
}

/// Process-local store for tests and `backend = "memory"` deployments.
/// Writes can be switched to fail to exercise the transient-error paths.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Collections>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn room(&self, code: &str) -> Option<Room> {
        self.data.lock().rooms.get(code).cloned()
    }

    pub fn story(&self, story_id: Uuid) -> Option<Story> {
        self.data.lock().stories.get(&story_id).cloned()
    }

    pub fn session(&self, session_id: Uuid) -> Option<VotingSession> {
        self.data.lock().sessions.get(&session_id).cloned()
    }

    pub fn votes_for(&self, session_id: Uuid) -> Vec<Vote> {
        let mut votes: Vec<Vote> = self
            .data
            .lock()
            .votes
            .values()
            .filter(|v| v.session_id == session_id)
            .cloned()
            .collect();
        votes.sort_by(|a, b| (a.round, a.submitted_at).cmp(&(b.round, b.submitted_at)));
        votes
    }

    fn check_writable(&self) -> DaoResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DaoError::Unavailable("memory store writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert_room(&self, room: &Room) -> DaoResult<()> {
        self.check_writable()?;
        self.data.lock().rooms.insert(room.id.clone(), room.clone());
        Ok(())
    }

    async fn delete_room(&self, code: &str) -> DaoResult<()> {
        self.check_writable()?;
        let mut data = self.data.lock();
        data.rooms.remove(code);
        data.stories.retain(|_, s| s.room_id != code);
        data.sessions.retain(|_, s| s.room_id != code);
        data.votes.retain(|_, v| v.room_id != code);
        Ok(())
    }

    async fn upsert_story(&self, story: &Story) -> DaoResult<()> {
        self.check_writable()?;
        self.data.lock().stories.insert(story.id, story.clone());
        Ok(())
    }

    async fn delete_story(&self, story_id: Uuid) -> DaoResult<()> {
        self.check_writable()?;
        let mut data = self.data.lock();
        data.stories.remove(&story_id);
        let sessions: Vec<Uuid> = data
            .sessions
            .values()
            .filter(|s| s.story_id == story_id)
            .map(|s| s.id)
            .collect();
        data.sessions.retain(|_, s| s.story_id != story_id);
        data.votes.retain(|_, v| !sessions.contains(&v.session_id));
        Ok(())
    }

    async fn upsert_session(&self, session: &VotingSession) -> DaoResult<()> {
        self.check_writable()?;
        self.data.lock().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn upsert_vote(&self, vote: &Vote) -> DaoResult<()> {
        self.check_writable()?;
        self.data.lock().votes.insert(vote.id.clone(), vote.clone());
        Ok(())
    }

    async fn load_rooms(&self) -> DaoResult<Vec<Room>> {
        let mut rooms: Vec<Room> = self.data.lock().rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rooms)
    }

    async fn load_stories(&self, code: &str) -> DaoResult<Vec<Story>> {
        let mut stories: Vec<Story> = self
            .data
            .lock()
            .stories
            .values()
            .filter(|s| s.room_id == code)
            .cloned()
            .collect();
        stories.sort_by_key(|s| s.position);
        Ok(stories)
    }

    async fn load_sessions(&self, code: &str) -> DaoResult<Vec<VotingSession>> {
        let mut sessions: Vec<VotingSession> = self
            .data
            .lock()
            .sessions
            .values()
            .filter(|s| s.room_id == code)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn load_votes(&self, code: &str) -> DaoResult<Vec<Vote>> {
        let mut votes: Vec<Vote> = self
            .data
            .lock()
            .votes
            .values()
            .filter(|v| v.room_id == code)
            .cloned()
            .collect();
        votes.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(votes)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
