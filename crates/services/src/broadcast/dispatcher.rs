use std::sync::Arc;

use pointroom_protocol::{ConnectionId, RoomCode, ServerFrame};
use tracing::{debug, warn};

use super::storage::ConnectionStorage;

/// Fans server frames out to connection queues. Sends never block: each
/// queue is unbounded and drained by its own writer task, so calling these
/// under a room lock keeps per-room order without stalling on slow sockets.
/// Nothing is retried or replayed.
#[derive(Clone)]
pub struct Dispatcher {
    storage: Arc<ConnectionStorage>,
}

impl Dispatcher {
    pub fn new(storage: Arc<ConnectionStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<ConnectionStorage> {
        &self.storage
    }

    /// Sends one frame to every connection bound to the room. Returns the
    /// number of queues it reached.
    pub fn broadcast(&self, room: &RoomCode, frame: &ServerFrame) -> usize {
        self.broadcast_except(room, None, frame)
    }

    pub fn broadcast_except(
        &self,
        room: &RoomCode,
        except: Option<ConnectionId>,
        frame: &ServerFrame,
    ) -> usize {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(%room, event = frame.event.name(), %e, "Failed to encode broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        for (connection_id, user_id, sender) in self.storage.room_members(room) {
            if Some(connection_id) == except {
                continue;
            }
            if sender.send(text.clone()).is_err() {
                debug!(%room, %connection_id, %user_id, "Connection queue closed, skipping");
            } else {
                delivered += 1;
            }
        }
        debug!(%room, event = frame.event.name(), delivered, "Broadcast dispatched");
        delivered
    }

    /// Sends a frame to a single connection. Returns false when the
    /// connection is gone.
    pub fn send_to_connection(&self, connection_id: &ConnectionId, frame: &ServerFrame) -> bool {
        let Some(sender) = self.storage.sender(connection_id) else {
            debug!(%connection_id, event = frame.event.name(), "Unknown connection, dropping frame");
            return false;
        };
        match frame.to_text() {
            Ok(text) => sender.send(text).is_ok(),
            Err(e) => {
                warn!(%connection_id, event = frame.event.name(), %e, "Failed to encode frame");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointroom_protocol::ServerEvent;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn room_members_see_frames_in_order() {
        let storage = Arc::new(ConnectionStorage::new());
        let dispatcher = Dispatcher::new(storage.clone());
        let room = RoomCode::parse("ABC123").unwrap();
        let other = RoomCode::parse("XYZ789").unwrap();

        let mut receivers = Vec::new();
        for (user, code) in [("alice", &room), ("bob", &room), ("carol", &other)] {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = Uuid::new_v4();
            storage.add(conn, tx);
            storage.bind(conn, user.to_string(), code.clone());
            receivers.push(rx);
        }

        for user_id in ["x", "y", "z"] {
            let frame = ServerFrame::new(ServerEvent::UserLeft {
                user_id: user_id.to_string(),
            });
            assert_eq!(dispatcher.broadcast(&room, &frame), 2);
        }

        for rx in receivers.iter_mut().take(2) {
            let seen: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
                .map(|text| match ServerFrame::parse(&text).unwrap().event {
                    ServerEvent::UserLeft { user_id } => user_id,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            assert_eq!(seen, vec!["x", "y", "z"]);
        }
        assert!(receivers[2].try_recv().is_err());
    }

    #[test]
    fn direct_send_to_unknown_connection_is_dropped() {
        let dispatcher = Dispatcher::new(Arc::new(ConnectionStorage::new()));
        let frame = ServerFrame::new(ServerEvent::Pong);
        assert!(!dispatcher.send_to_connection(&Uuid::new_v4(), &frame));
    }
}
