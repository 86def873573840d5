use bson::doc;
use mongodb::Database;
use pointroom_db::models::Vote;
use uuid::Uuid;

use super::base::{BaseDao, DaoResult, id_bson};

pub struct VoteDao {
    pub base: BaseDao<Vote>,
}

impl VoteDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, Vote::COLLECTION),
        }
    }

    /// Keyed by `(session, round, user)`, so a resubmission replaces the
    /// earlier document.
    pub async fn upsert(&self, vote: &Vote) -> DaoResult<()> {
        self.base.upsert_by_id(&vote.id, vote).await
    }

    pub async fn find_by_room(&self, code: &str) -> DaoResult<Vec<Vote>> {
        self.base
            .find_many(doc! { "room_id": code }, Some(doc! { "submitted_at": 1 }))
            .await
    }

    pub async fn delete_by_sessions(&self, session_ids: &[Uuid]) -> DaoResult<u64> {
        let ids = session_ids
            .iter()
            .map(id_bson)
            .collect::<DaoResult<Vec<_>>>()?;
        self.base
            .delete_many(doc! { "session_id": { "$in": ids } })
            .await
    }

    pub async fn delete_by_room(&self, code: &str) -> DaoResult<u64> {
        self.base.delete_many(doc! { "room_id": code }).await
    }
}
