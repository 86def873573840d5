//! Durable backing for room state. The engine keeps the authoritative copy in
//! memory and writes through a [`crate::persist::Persister`]; a store is only
//! read back at startup.

pub mod memory;

use async_trait::async_trait;
use pointroom_db::models::{Room, Story, Vote, VotingSession};
use uuid::Uuid;

pub use crate::dao::base::{DaoError, DaoResult};
pub use memory::MemoryStore;

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn upsert_room(&self, room: &Room) -> DaoResult<()>;

    /// Removes the room with every story, session and vote it owns.
    async fn delete_room(&self, code: &str) -> DaoResult<()>;

    async fn upsert_story(&self, story: &Story) -> DaoResult<()>;

    /// Removes the story with its sessions and their votes.
    async fn delete_story(&self, story_id: Uuid) -> DaoResult<()>;

    async fn upsert_session(&self, session: &VotingSession) -> DaoResult<()>;

    async fn upsert_vote(&self, vote: &Vote) -> DaoResult<()>;

    async fn load_rooms(&self) -> DaoResult<Vec<Room>>;

    async fn load_stories(&self, code: &str) -> DaoResult<Vec<Story>>;

    async fn load_sessions(&self, code: &str) -> DaoResult<Vec<VotingSession>>;

    async fn load_votes(&self, code: &str) -> DaoResult<Vec<Vote>>;

    /// Human-readable backend name.
    fn name(&self) -> &str;
}
