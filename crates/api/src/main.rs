use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pointroom_api::{build_router, state::AppState};
use pointroom_config::{Settings, StoreBackend};
use pointroom_services::dao::MongoStore;
use pointroom_services::{DocumentStore, Engine, MemoryStore, sweeper};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings);

    let store: Arc<dyn DocumentStore> = match settings.database.backend {
        StoreBackend::Mongo => {
            let db = pointroom_db::connect(&settings.database)
                .await
                .context("connecting to MongoDB")?;
            pointroom_db::indexes::ensure_indexes(&db)
                .await
                .context("creating indexes")?;
            Arc::new(MongoStore::new(&db))
        }
        StoreBackend::Memory => {
            info!("Using the in-memory store; rooms will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Engine::new(store, &settings)?;
    let recovered = engine.recover().await?;
    info!(recovered, "Room state restored");

    let _sweeper = sweeper::start(
        engine.clone(),
        Duration::from_secs(settings.rooms.sweep_interval_secs),
    )
    .await
    .context("starting room sweeper")?;

    let addr = settings.bind_addr();
    let app = build_router(AppState::new(engine, settings));
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Pointroom listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
