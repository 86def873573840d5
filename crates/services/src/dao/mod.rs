pub mod base;
pub mod room;
pub mod story;
pub mod vote;
pub mod voting_session;

use async_trait::async_trait;
use mongodb::Database;
use pointroom_db::models::{Room, Story, Vote, VotingSession};
use uuid::Uuid;

pub use base::{BaseDao, DaoError, DaoResult};
pub use room::RoomDao;
pub use story::StoryDao;
pub use vote::VoteDao;
pub use voting_session::VotingSessionDao;

use crate::store::DocumentStore;

/// MongoDB-backed [`DocumentStore`].
pub struct MongoStore {
    pub rooms: RoomDao,
    pub stories: StoryDao,
    pub sessions: VotingSessionDao,
    pub votes: VoteDao,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            rooms: RoomDao::new(db),
            stories: StoryDao::new(db),
            sessions: VotingSessionDao::new(db),
            votes: VoteDao::new(db),
        }
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn upsert_room(&self, room: &Room) -> DaoResult<()> {
        self.rooms.upsert(room).await
    }

    async fn delete_room(&self, code: &str) -> DaoResult<()> {
        self.votes.delete_by_room(code).await?;
        self.sessions.delete_by_room(code).await?;
        self.stories.delete_by_room(code).await?;
        self.rooms.delete(code).await?;
        Ok(())
    }

    async fn upsert_story(&self, story: &Story) -> DaoResult<()> {
        self.stories.upsert(story).await
    }

    async fn delete_story(&self, story_id: Uuid) -> DaoResult<()> {
        let session_ids: Vec<Uuid> = self
            .sessions
            .find_by_story(story_id)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        if !session_ids.is_empty() {
            self.votes.delete_by_sessions(&session_ids).await?;
        }
        self.sessions.delete_by_story(story_id).await?;
        self.stories.delete(story_id).await?;
        Ok(())
    }

    async fn upsert_session(&self, session: &VotingSession) -> DaoResult<()> {
        self.sessions.upsert(session).await
    }

    async fn upsert_vote(&self, vote: &Vote) -> DaoResult<()> {
        self.votes.upsert(vote).await
    }

    async fn load_rooms(&self) -> DaoResult<Vec<Room>> {
        self.rooms.find_all().await
    }

    async fn load_stories(&self, code: &str) -> DaoResult<Vec<Story>> {
        self.stories.find_by_room(code).await
    }

    async fn load_sessions(&self, code: &str) -> DaoResult<Vec<VotingSession>> {
        self.sessions.find_by_room(code).await
    }

    async fn load_votes(&self, code: &str) -> DaoResult<Vec<Vote>> {
        self.votes.find_by_room(code).await
    }

    fn name(&self) -> &str {
        "mongo"
    }
}
