use bson::doc;
use mongodb::Database;
use pointroom_db::models::VotingSession;
use uuid::Uuid;

use super::base::{BaseDao, DaoResult, id_bson};

pub struct VotingSessionDao {
    pub base: BaseDao<VotingSession>,
}

impl VotingSessionDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, VotingSession::COLLECTION),
        }
    }

    pub async fn upsert(&self, session: &VotingSession) -> DaoResult<()> {
        self.base.upsert_by_id(session.id, session).await
    }

    pub async fn find_by_room(&self, code: &str) -> DaoResult<Vec<VotingSession>> {
        self.base
            .find_many(doc! { "room_id": code }, Some(doc! { "created_at": 1 }))
            .await
    }

    pub async fn find_by_story(&self, story_id: Uuid) -> DaoResult<Vec<VotingSession>> {
        self.base
            .find_many(
                doc! { "story_id": id_bson(story_id)? },
                Some(doc! { "created_at": 1 }),
            )
            .await
    }

    pub async fn delete_by_story(&self, story_id: Uuid) -> DaoResult<u64> {
        self.base
            .delete_many(doc! { "story_id": id_bson(story_id)? })
            .await
    }

    pub async fn delete_by_room(&self, code: &str) -> DaoResult<u64> {
        self.base.delete_many(doc! { "room_id": code }).await
    }
}
