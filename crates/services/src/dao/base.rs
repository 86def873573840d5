use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{Collection, Database};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum DaoError {
    #[error("Document not found")]
    NotFound,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("BSON serialization error: {0}")]
    BsonSer(#[from] bson::ser::Error),
    #[error("BSON deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),
}

pub type DaoResult<T> = Result<T, DaoError>;

/// Typed access to one collection. Documents are keyed by `_id` and written
/// as whole-document replacements, so replaying a write is harmless.
pub struct BaseDao<T: Send + Sync> {
    collection: Collection<T>,
}

impl<T> BaseDao<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    pub fn new(db: &Database, name: &str) -> Self {
        Self {
            collection: db.collection::<T>(name),
        }
    }

    pub fn collection(&self) -> &Collection<T> {
        &self.collection
    }

    pub async fn find_many(&self, filter: Document, sort: Option<Document>) -> DaoResult<Vec<T>> {
        let mut find = self.collection.find(filter);
        if let Some(sort) = sort {
            find = find.sort(sort);
        }
        let cursor = find.await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn upsert_by_id(&self, id: impl Serialize, document: &T) -> DaoResult<()> {
        let filter = doc! { "_id": bson::to_bson(&id)? };
        self.collection
            .replace_one(filter, document)
            .upsert(true)
            .await?;
        Ok(())
    }

    pub async fn delete_by_id(&self, id: impl Serialize) -> DaoResult<bool> {
        let filter = doc! { "_id": bson::to_bson(&id)? };
        let result = self.collection.delete_one(filter).await?;
        Ok(result.deleted_count > 0)
    }

    pub async fn delete_many(&self, filter: Document) -> DaoResult<u64> {
        let result = self.collection.delete_many(filter).await?;
        Ok(result.deleted_count)
    }
}

/// Filter value for a field holding a serialized id.
pub fn id_bson(id: impl Serialize) -> DaoResult<Bson> {
    Ok(bson::to_bson(&id)?)
}
