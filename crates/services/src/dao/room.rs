use bson::doc;
use mongodb::Database;
use pointroom_db::models::Room;

use super::base::{BaseDao, DaoResult};

pub struct RoomDao {
    pub base: BaseDao<Room>,
}

impl RoomDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, Room::COLLECTION),
        }
    }

    pub async fn upsert(&self, room: &Room) -> DaoResult<()> {
        self.base.upsert_by_id(&room.id, room).await
    }

    pub async fn find_all(&self) -> DaoResult<Vec<Room>> {
        self.base
            .find_many(doc! {}, Some(doc! { "created_at": 1 }))
            .await
    }

    pub async fn delete(&self, code: &str) -> DaoResult<bool> {
        self.base.delete_by_id(code).await
    }
}
