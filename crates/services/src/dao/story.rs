use bson::doc;
use mongodb::Database;
use pointroom_db::models::Story;
use uuid::Uuid;

use super::base::{BaseDao, DaoResult};

pub struct StoryDao {
    pub base: BaseDao<Story>,
}

impl StoryDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, Story::COLLECTION),
        }
    }

    pub async fn upsert(&self, story: &Story) -> DaoResult<()> {
        self.base.upsert_by_id(story.id, story).await
    }

    pub async fn find_by_room(&self, code: &str) -> DaoResult<Vec<Story>> {
        self.base
            .find_many(doc! { "room_id": code }, Some(doc! { "position": 1 }))
            .await
    }

    pub async fn delete(&self, story_id: Uuid) -> DaoResult<bool> {
        self.base.delete_by_id(story_id).await
    }

    pub async fn delete_by_room(&self, code: &str) -> DaoResult<u64> {
        self.base.delete_many(doc! { "room_id": code }).await
    }
}
