//! Room membership.
//!
//! A room is a named set of connections that receive each other's
//! broadcasts. Rooms are created on first join and closed when the
//! registry reclaims them.

use crate::connection::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// A room name.
pub type RoomName = String;

/// A named set of member connections.
#[derive(Debug, Clone, Default)]
pub struct Room {
    name: RoomName,
    members: HashSet<ConnectionId>,
    /// Set once the room has been dropped from the registry.
    closed: bool,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<RoomName>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
            closed: false,
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains(connection_id)
    }

    /// Add a member.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn insert(&mut self, connection_id: ConnectionId) -> bool {
        let added = self.members.insert(connection_id);
        if added {
            debug!(room = %self.name, members = self.members.len(), "Member added");
        }
        added
    }

    /// Remove a member.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.members.remove(connection_id);
        if removed {
            debug!(room = %self.name, connection = %connection_id, "Member removed");
        }
        removed
    }

    /// Iterate over members.
    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Mark the room as reclaimed. A closed room accepts no new members.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Check if the room was reclaimed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_creation() {
        let room = Room::new("lobby");
        assert_eq!(room.name(), "lobby");
        assert_eq!(room.member_count(), 0);
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_insert_remove() {
        let mut room = Room::new("lobby");
        let alice = ConnectionId::from("conn-1");
        let bob = ConnectionId::from("conn-2");

        assert!(room.insert(alice.clone()));
        assert!(!room.insert(alice.clone()));
        assert!(room.insert(bob.clone()));
        assert_eq!(room.member_count(), 2);

        assert!(room.remove(&alice));
        assert!(!room.contains(&alice));
        assert!(!room.remove(&alice));
        assert_eq!(room.members().collect::<Vec<_>>(), vec![&bob]);
    }

    #[test]
    fn test_room_close() {
        let mut room = Room::new("lobby");
        assert!(!room.is_closed());
        room.close();
        assert!(room.is_closed());
    }
}
