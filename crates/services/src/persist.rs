//! Write-behind persistence.
//!
//! Room handlers never await I/O while holding a room lock. They enqueue
//! writes here instead; a single task applies them in submission order.
//! Ordinary writes are best effort: failures are logged and dropped.
//! Critical writes are retried and their outcome is reported back through a
//! [`PendingWrite`] the handler awaits after releasing the lock.

use std::sync::Arc;
use std::time::Duration;

use pointroom_db::models::{Room, Story, Vote, VotingSession};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::store::{DaoError, DocumentStore};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub enum WriteOp {
    Room(Room),
    DeleteRoom(String),
    Story(Story),
    DeleteStory(Uuid),
    Session(VotingSession),
    Vote(Vote),
}

impl WriteOp {
    fn label(&self) -> &'static str {
        match self {
            WriteOp::Room(_) => "room",
            WriteOp::DeleteRoom(_) => "delete_room",
            WriteOp::Story(_) => "story",
            WriteOp::DeleteStory(_) => "delete_story",
            WriteOp::Session(_) => "session",
            WriteOp::Vote(_) => "vote",
        }
    }

    async fn apply(&self, store: &dyn DocumentStore) -> Result<(), DaoError> {
        match self {
            WriteOp::Room(room) => store.upsert_room(room).await,
            WriteOp::DeleteRoom(code) => store.delete_room(code).await,
            WriteOp::Story(story) => store.upsert_story(story).await,
            WriteOp::DeleteStory(id) => store.delete_story(*id).await,
            WriteOp::Session(session) => store.upsert_session(session).await,
            WriteOp::Vote(vote) => store.upsert_vote(vote).await,
        }
    }
}

struct Job {
    op: WriteOp,
    ack: Option<oneshot::Sender<Result<(), String>>>,
}

/// Acknowledgement of a critical write.
pub struct PendingWrite(oneshot::Receiver<Result<(), String>>);

impl PendingWrite {
    pub async fn wait(self) -> ServiceResult<()> {
        match self.0.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ServiceError::TransientIo(reason)),
            Err(_) => Err(ServiceError::TransientIo(
                "persister stopped before the write completed".to_string(),
            )),
        }
    }
}

#[derive(Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<Job>,
}

impl Persister {
    /// Spawns the writer task on the current runtime. It stops once every
    /// `Persister` clone has been dropped and the queue is drained.
    pub fn spawn(store: Arc<dyn DocumentStore>, critical_attempts: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, rx, critical_attempts.max(1)));
        Self { tx }
    }

    pub fn enqueue(&self, op: WriteOp) {
        if self.tx.send(Job { op, ack: None }).is_err() {
            warn!("Persister is gone, dropping write");
        }
    }

    pub fn enqueue_critical(&self, op: WriteOp) -> PendingWrite {
        let (ack, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(job)) = self.tx.send(Job { op, ack: Some(ack) }) {
            if let Some(ack) = job.ack {
                let _ = ack.send(Err("persister is not running".to_string()));
            }
        }
        PendingWrite(rx)
    }
}

async fn run(store: Arc<dyn DocumentStore>, mut rx: mpsc::UnboundedReceiver<Job>, attempts: u32) {
    info!(backend = store.name(), "Persister started");
    while let Some(job) = rx.recv().await {
        let label = job.op.label();
        match job.ack {
            None => {
                if let Err(e) = job.op.apply(store.as_ref()).await {
                    warn!(op = label, %e, "Write-behind failed, dropping");
                } else {
                    debug!(op = label, "Write applied");
                }
            }
            Some(ack) => {
                let result = apply_with_retry(store.as_ref(), &job.op, attempts).await;
                if let Err(reason) = &result {
                    error!(op = label, attempts, %reason, "Critical write failed");
                }
                let _ = ack.send(result);
            }
        }
    }
    debug!("Persister stopped");
}

async fn apply_with_retry(
    store: &dyn DocumentStore,
    op: &WriteOp,
    attempts: u32,
) -> Result<(), String> {
    let mut last = String::new();
    for attempt in 1..=attempts {
        match op.apply(store).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(op = op.label(), attempt, %e, "Critical write attempt failed");
                last = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
            }
        }
    }
    Err(last)
}
