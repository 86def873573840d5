use dashmap::DashMap;
use pointroom_protocol::{ConnectionId, RoomCode, UserId};
use tokio::sync::mpsc;

/// Outbound text frames for one connection, drained in order by the
/// transport's writer task.
pub type ConnSender = mpsc::UnboundedSender<String>;

struct ConnectionEntry {
    sender: ConnSender,
    /// Set once the connection has created or joined a room.
    identity: Option<(UserId, RoomCode)>,
}

/// Tracks live connections and which room each one is bound to. A user can
/// hold several connections in one room (multiple tabs/devices).
pub struct ConnectionStorage {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// room -> connections in bind order
    rooms: DashMap<RoomCode, Vec<ConnectionId>>,
}

impl ConnectionStorage {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    pub fn add(&self, connection_id: ConnectionId, sender: ConnSender) {
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                sender,
                identity: None,
            },
        );
    }

    /// Forgets the connection and returns the identity it was bound to.
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<(UserId, RoomCode)> {
        let identity = self.unbind(connection_id);
        self.connections.remove(connection_id);
        identity
    }

    /// Binds the connection to a user in a room, replacing any previous
    /// binding.
    pub fn bind(&self, connection_id: ConnectionId, user_id: UserId, room: RoomCode) {
        self.unbind(&connection_id);
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            return;
        };
        entry.identity = Some((user_id, room.clone()));
        drop(entry);
        self.rooms.entry(room).or_default().push(connection_id);
    }

    pub fn unbind(&self, connection_id: &ConnectionId) -> Option<(UserId, RoomCode)> {
        let (user_id, room) = self
            .connections
            .get_mut(connection_id)
            .and_then(|mut entry| entry.identity.take())?;
        self.detach_from_room(&room, connection_id);
        Some((user_id, room))
    }

    fn detach_from_room(&self, room: &RoomCode, connection_id: &ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.retain(|c| c != connection_id);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(room, |_, members| members.is_empty());
            }
        }
    }

    /// Drops every binding to the room, e.g. when it is purged.
    pub fn unbind_room(&self, room: &RoomCode) -> Vec<ConnectionId> {
        let members = self
            .rooms
            .remove(room)
            .map(|(_, members)| members)
            .unwrap_or_default();
        for connection_id in &members {
            if let Some(mut entry) = self.connections.get_mut(connection_id) {
                entry.identity = None;
            }
        }
        members
    }

    pub fn identity(&self, connection_id: &ConnectionId) -> Option<(UserId, RoomCode)> {
        self.connections
            .get(connection_id)
            .and_then(|entry| entry.identity.clone())
    }

    pub fn sender(&self, connection_id: &ConnectionId) -> Option<ConnSender> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.sender.clone())
    }

    /// Recipients bound to the room, in bind order.
    pub fn room_members(&self, room: &RoomCode) -> Vec<(ConnectionId, UserId, ConnSender)> {
        let ids = self
            .rooms
            .get(room)
            .map(|members| members.clone())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|connection_id| {
                let entry = self.connections.get(&connection_id)?;
                let (user_id, _) = entry.identity.as_ref()?;
                Some((connection_id, user_id.clone(), entry.sender.clone()))
            })
            .collect()
    }

    /// Number of the user's connections bound to the room.
    pub fn user_connection_count(&self, room: &RoomCode, user_id: &str) -> usize {
        self.room_members(room)
            .iter()
            .filter(|(_, member, _)| member == user_id)
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionStorage {
    fn default() -> Self {
        Self::new()
    }
}
