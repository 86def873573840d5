//! Optimistic operations awaiting server confirmation.

use std::collections::HashMap;
use std::time::Duration;

use pointroom_protocol::{CorrelationId, SessionId, StoryId, StoryView};
use tokio::time::Instant;

use crate::mirror::Mirror;

/// An optimistic change plus what it overwrote.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    Vote {
        story_id: StoryId,
        session_id: SessionId,
        previous: Option<String>,
        /// Whether the user was already listed as having voted.
        was_listed: bool,
    },
    /// The placeholder story uses the correlation id as its id.
    CreateStory { placeholder: StoryId },
    UpdateStory { previous: StoryView },
}

impl PendingOp {
    /// Puts back the value captured before the optimistic change.
    pub(crate) fn rollback(self, mirror: &mut Mirror) {
        match self {
            PendingOp::Vote {
                story_id,
                session_id,
                previous,
                was_listed,
            } => {
                let me = mirror.user_id.clone().unwrap_or_default();
                if let Some(session) = mirror
                    .session_mut(story_id)
                    .filter(|s| s.id == session_id)
                {
                    session.my_vote = previous;
                    if !was_listed {
                        session.voted.retain(|u| u != &me);
                    }
                }
            }
            PendingOp::CreateStory { placeholder } => mirror.remove_story(placeholder),
            PendingOp::UpdateStory { previous } => {
                if mirror.story(previous.id).is_some() {
                    mirror.upsert_story(previous);
                }
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    op: PendingOp,
    issued_at: Instant,
}

#[derive(Debug)]
pub struct PendingQueue {
    entries: HashMap<CorrelationId, Entry>,
    timeout: Duration,
}

impl PendingQueue {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
        }
    }

    pub fn insert(&mut self, correlation_id: CorrelationId, op: PendingOp, now: Instant) {
        self.entries.insert(
            correlation_id,
            Entry {
                op,
                issued_at: now,
            },
        );
    }

    pub fn take(&mut self, correlation_id: &CorrelationId) -> Option<PendingOp> {
        self.entries.remove(correlation_id).map(|e| e.op)
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.entries.contains_key(correlation_id)
    }

    /// Removes and returns operations unconfirmed for longer than the timeout.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(CorrelationId, PendingOp)> {
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.issued_at) >= self.timeout)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.take(&id).map(|op| (id, op)))
            .collect()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
