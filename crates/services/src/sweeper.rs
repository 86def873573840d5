//! Periodic room housekeeping: archive idle rooms, purge expired ones.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, info};

use crate::engine::Engine;

/// Starts the lifecycle job. Keep the returned scheduler alive for as long
/// as the job should run.
pub async fn start(engine: Arc<Engine>, every: Duration) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_repeated_async(every, move |_id, _scheduler| {
        let engine = engine.clone();
        Box::pin(async move {
            sweep(&engine);
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    info!(interval_secs = every.as_secs(), "Room sweeper started");
    Ok(scheduler)
}

/// One housekeeping pass.
pub fn sweep(engine: &Engine) {
    let now = Utc::now();
    let archived = engine.sweep_inactive(now);
    let purged = engine.purge_expired(now);
    if archived.is_empty() && purged.is_empty() {
        debug!("Sweep found nothing to do");
    } else {
        info!(archived = archived.len(), purged = purged.len(), "Sweep finished");
    }
}
