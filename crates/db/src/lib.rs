pub mod indexes;
pub mod models;

use mongodb::{Client, Database};
use pointroom_config::DatabaseSettings;
use tracing::info;

pub async fn connect(settings: &DatabaseSettings) -> Result<Database, mongodb::error::Error> {
    let client = Client::with_uri_str(&settings.url).await?;
    let db = client.database(&settings.name);
    info!(database = %settings.name, "Connected to MongoDB");
    Ok(db)
}
