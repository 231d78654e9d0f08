use std::collections::HashMap;
use tokio::sync::mpsc;

use super::protocol::ServerEvent;

/// Outbound queue of one connection. Its writer task drains it into the socket.
pub type Outbox = mpsc::Sender<ServerEvent>;

/// Broadcast groups keyed by session id. A connection may sit in several
/// groups and a group may hold several connections (player plus spectators).
#[derive(Default)]
pub struct Rooms {
    rooms: HashMap<String, HashMap<String, Outbox>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, room: &str, conn_id: &str, outbox: Outbox) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id.to_string(), outbox);
    }

    /// Remove a connection from one group. Returns whether it was a member.
    pub fn leave(&mut self, room: &str, conn_id: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(conn_id).is_some();
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    /// Remove a connection from every group. Returns how many it left.
    pub fn leave_all(&mut self, conn_id: &str) -> usize {
        let mut left = 0;
        self.rooms.retain(|_, members| {
            if members.remove(conn_id).is_some() {
                left += 1;
            }
            !members.is_empty()
        });
        left
    }

    pub fn is_member(&self, room: &str, conn_id: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains_key(conn_id))
    }

    /// Snapshot of a group's `(connection id, outbox)` pairs, so sends
    /// happen outside the lock.
    pub fn members(&self, room: &str) -> Vec<(String, Outbox)> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .map(|(id, outbox)| (id.clone(), outbox.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
