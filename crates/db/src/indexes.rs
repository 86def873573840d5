use bson::{Document, doc};
use mongodb::{Database, IndexModel, error::ErrorKind, options::IndexOptions};
use tracing::{info, warn};

use crate::models::{Room, Story, Vote, VotingSession};

/// Server error code for an index that exists under the same name with
/// different options.
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

fn plan() -> Vec<(&'static str, Vec<IndexModel>)> {
    vec![
        // The room code is `_id`, so uniqueness comes for free.
        (
            Room::COLLECTION,
            vec![
                index(doc! { "status": 1, "last_activity": 1 }, false),
                index(doc! { "status": 1, "archived_at": 1 }, false),
                index(doc! { "participants.user_id": 1 }, false),
            ],
        ),
        (
            Story::COLLECTION,
            vec![index(doc! { "room_id": 1, "position": 1 }, false)],
        ),
        (
            VotingSession::COLLECTION,
            vec![
                index(doc! { "story_id": 1, "created_at": -1 }, false),
                index(doc! { "room_id": 1, "state": 1 }, false),
            ],
        ),
        // One ballot per user and round.
        (
            Vote::COLLECTION,
            vec![
                index(doc! { "session_id": 1, "round": 1, "user_id": 1 }, true),
                index(doc! { "room_id": 1 }, false),
            ],
        ),
    ]
}

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    for (collection, models) in plan() {
        apply(db, collection, models).await?;
    }
    info!("Indexes ensured");
    Ok(())
}

fn index(keys: Document, unique: bool) -> IndexModel {
    let builder = IndexModel::builder().keys(keys);
    if unique {
        builder
            .options(IndexOptions::builder().unique(true).build())
            .build()
    } else {
        builder.build()
    }
}

async fn apply(
    db: &Database,
    collection: &str,
    models: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    let coll = db.collection::<Document>(collection);
    let err = match coll.create_indexes(models.clone()).await {
        Ok(_) => return Ok(()),
        Err(e) => e,
    };
    let conflicting = matches!(
        *err.kind,
        ErrorKind::Command(ref cmd) if cmd.code == INDEX_KEY_SPECS_CONFLICT
    );
    if !conflicting {
        return Err(err);
    }
    warn!(collection, "Index options changed, rebuilding indexes");
    coll.drop_indexes().await?;
    coll.create_indexes(models).await?;
    Ok(())
}
