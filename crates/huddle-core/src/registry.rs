//! Room registry.
//!
//! The registry owns room membership and fans envelopes out to room
//! members through an [`Outbox`]. It is the only shared mutable state in
//! the relay.
//!
//! Each room sits behind its own lock. The room index is a sharded
//! concurrent map that is only held long enough to look a room up, so
//! joins, leaves and broadcasts targeting one room are linearizable while
//! operations on different rooms never block one another.

use crate::connection::ConnectionId;
use crate::outbox::Outbox;
use crate::room::{Room, RoomName};
use dashmap::DashMap;
use huddle_protocol::Envelope;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

type SharedRoom = Arc<Mutex<Room>>;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Drop a room from the registry once its last member leaves.
    pub reclaim_empty_rooms: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reclaim_empty_rooms: true,
        }
    }
}

/// Room membership and broadcast fan-out.
///
/// None of the operations fail: unknown rooms and unknown connections are
/// valid, silent states, since departures routinely race with
/// disconnects.
///
/// A room lock is held while a broadcast hands envelopes to the
/// [`Outbox`], so `Outbox::emit` must not block.
pub struct RoomRegistry {
    /// Rooms indexed by name.
    rooms: DashMap<RoomName, SharedRoom>,
    /// Room each connection currently occupies.
    memberships: DashMap<ConnectionId, RoomName>,
    /// Delivery to individual connections.
    outbox: Arc<dyn Outbox>,
    /// Configuration.
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new(outbox: Arc<dyn Outbox>) -> Self {
        Self::with_config(outbox, RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(outbox: Arc<dyn Outbox>, config: RegistryConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            outbox,
            config,
        }
    }

    /// Add a connection to a room, creating the room if absent.
    ///
    /// Joining a room the connection is already in changes nothing. A
    /// connection occupies at most one room, so joining a different room
    /// first removes it from the previous one.
    pub fn join(&self, connection_id: &ConnectionId, room: &str) {
        let previous = self
            .memberships
            .insert(connection_id.clone(), room.to_string());

        if let Some(previous) = previous.filter(|p| p != room) {
            debug!(connection = %connection_id, from = %previous, to = %room, "Switching rooms");
            self.detach(connection_id, &previous);
        }

        loop {
            let shared = Arc::clone(
                self.rooms
                    .entry(room.to_string())
                    .or_insert_with(|| {
                        debug!(room = %room, "Creating room");
                        Arc::new(Mutex::new(Room::new(room)))
                    })
                    .value(),
            );

            let mut entry = shared.lock();
            if entry.is_closed() {
                // Reclaimed between lookup and lock; the next lookup creates it afresh.
                trace!(room = %room, "Room reclaimed during join, retrying");
                continue;
            }

            if entry.insert(connection_id.clone()) {
                debug!(
                    room = %room,
                    connection = %connection_id,
                    members = entry.member_count(),
                    "Joined"
                );
            } else {
                trace!(room = %room, connection = %connection_id, "Already joined");
            }
            return;
        }
    }

    /// Remove a connection from a room.
    ///
    /// A no-op if the connection is not a member.
    pub fn leave(&self, connection_id: &ConnectionId, room: &str) {
        let removed = self.detach(connection_id, room);
        self.memberships
            .remove_if(connection_id, |_, current| current == room);

        if removed {
            debug!(room = %room, connection = %connection_id, "Left");
        } else {
            trace!(room = %room, connection = %connection_id, "Leave for non-member ignored");
        }
    }

    /// Emit an envelope to every member of a room except `exclude`.
    ///
    /// Returns the number of members the envelope was queued for. A failed
    /// delivery to one member is logged and does not stop the fan-out.
    pub fn broadcast(
        &self,
        room: &str,
        envelope: Envelope,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let Some(shared) = self.room(room) else {
            trace!(room = %room, "Broadcast to absent room");
            return 0;
        };

        let envelope = Arc::new(envelope);
        let mut delivered = 0;

        let entry = shared.lock();
        for member in entry.members() {
            if exclude == Some(member) {
                continue;
            }
            match self.outbox.emit(member, Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(room = %room, connection = %member, error = %e, "Delivery failed");
                }
            }
        }

        trace!(room = %room, recipients = delivered, "Broadcast");
        delivered
    }

    /// Emit an envelope to a single connection.
    ///
    /// Returns `true` if the envelope was queued.
    pub fn emit_to_connection(&self, connection_id: &ConnectionId, envelope: Envelope) -> bool {
        match self.outbox.emit(connection_id, Arc::new(envelope)) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Delivery failed");
                false
            }
        }
    }

    /// Get the room a connection currently occupies.
    #[must_use]
    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<RoomName> {
        self.memberships.get(connection_id).map(|r| r.clone())
    }

    /// Check if a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId, room: &str) -> bool {
        self.room(room)
            .map(|r| r.lock().contains(connection_id))
            .unwrap_or(false)
    }

    /// Get the members of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.room(room)
            .map(|r| r.lock().members().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.room(room).map(|r| r.lock().member_count()).unwrap_or(0)
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Get all room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<RoomName> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            member_count: self.memberships.len(),
        }
    }

    /// Look up a room. The index guard is released before the room is
    /// locked.
    fn room(&self, room: &str) -> Option<SharedRoom> {
        self.rooms.get(room).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a connection from a room's member set, reclaiming the room
    /// if it became empty.
    fn detach(&self, connection_id: &ConnectionId, room: &str) -> bool {
        let Some(shared) = self.room(room) else {
            return false;
        };

        let (removed, emptied) = {
            let mut entry = shared.lock();
            let removed = entry.remove(connection_id);
            (removed, entry.is_empty())
        };

        if emptied && self.config.reclaim_empty_rooms {
            // Closing under the index lock makes a concurrent join that
            // already holds this room retry against a fresh one.
            let reclaimed = self.rooms.remove_if(room, |_, candidate| {
                let mut candidate = candidate.lock();
                if candidate.is_empty() {
                    candidate.close();
                    true
                } else {
                    false
                }
            });
            if reclaimed.is_some() {
                debug!(room = %room, "Reclaimed empty room");
            }
        }

        removed
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of connections that occupy a room.
    pub member_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{ChannelOutbox, EnvelopeReceiver};

    fn registry() -> (Arc<ChannelOutbox>, RoomRegistry) {
        let outbox = Arc::new(ChannelOutbox::new());
        let registry = RoomRegistry::new(outbox.clone());
        (outbox, registry)
    }

    fn connect(outbox: &ChannelOutbox, id: &str) -> (ConnectionId, EnvelopeReceiver) {
        let id = ConnectionId::from(id);
        let rx = outbox.register(id.clone());
        (id, rx)
    }

    fn drain(rx: &mut EnvelopeReceiver) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push((*envelope).clone());
        }
        out
    }

    #[test]
    fn test_join_creates_room() {
        let (outbox, registry) = registry();
        let (alice, _rx) = connect(&outbox, "conn-1");

        registry.join(&alice, "lobby");

        assert!(registry.room_exists("lobby"));
        assert_eq!(registry.members("lobby"), vec![alice.clone()]);
        assert_eq!(registry.room_of(&alice), Some("lobby".to_string()));
    }

    #[test]
    fn test_join_is_idempotent() {
        let (outbox, registry) = registry();
        let (alice, _rx) = connect(&outbox, "conn-1");

        registry.join(&alice, "lobby");
        let after_first = registry.members("lobby");
        registry.join(&alice, "lobby");

        assert_eq!(registry.members("lobby"), after_first);
        assert_eq!(registry.member_count("lobby"), 1);
    }

    #[test]
    fn test_join_other_room_moves_connection() {
        let (outbox, registry) = registry();
        let (alice, _rx) = connect(&outbox, "conn-1");

        registry.join(&alice, "lobby");
        registry.join(&alice, "kitchen");

        assert!(!registry.is_member(&alice, "lobby"));
        assert!(!registry.room_exists("lobby"));
        assert!(registry.is_member(&alice, "kitchen"));
        assert_eq!(registry.stats().member_count, 1);
    }

    #[test]
    fn test_leave_removes_member_and_reclaims_room() {
        let (outbox, registry) = registry();
        let (alice, _rx1) = connect(&outbox, "conn-1");
        let (bob, _rx2) = connect(&outbox, "conn-2");

        registry.join(&alice, "lobby");
        registry.join(&bob, "lobby");

        registry.leave(&alice, "lobby");
        assert!(!registry.is_member(&alice, "lobby"));
        assert_eq!(registry.room_of(&alice), None);
        assert!(registry.room_exists("lobby"));

        registry.leave(&bob, "lobby");
        assert!(!registry.room_exists("lobby"));
        assert_eq!(registry.stats().room_count, 0);
    }

    #[test]
    fn test_leave_keeps_empty_room_when_reclaim_disabled() {
        let outbox = Arc::new(ChannelOutbox::new());
        let registry = RoomRegistry::with_config(
            outbox.clone(),
            RegistryConfig {
                reclaim_empty_rooms: false,
            },
        );
        let (alice, _rx) = connect(&outbox, "conn-1");

        registry.join(&alice, "lobby");
        registry.leave(&alice, "lobby");

        assert!(registry.room_exists("lobby"));
        assert_eq!(registry.member_count("lobby"), 0);
    }

    #[test]
    fn test_unknown_room_and_connection_are_no_ops() {
        let (outbox, registry) = registry();
        let (alice, mut rx) = connect(&outbox, "conn-1");

        registry.leave(&alice, "nowhere");
        registry.leave(&ConnectionId::from("ghost"), "nowhere");
        assert_eq!(registry.broadcast("nowhere", Envelope::chat("x"), None), 0);

        registry.join(&alice, "lobby");
        registry.leave(&ConnectionId::from("ghost"), "lobby");
        assert_eq!(registry.member_count("lobby"), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_leave_wrong_room_keeps_membership() {
        let (outbox, registry) = registry();
        let (alice, _rx) = connect(&outbox, "conn-1");

        registry.join(&alice, "lobby");
        registry.leave(&alice, "kitchen");

        assert!(registry.is_member(&alice, "lobby"));
        assert_eq!(registry.room_of(&alice), Some("lobby".to_string()));
    }

    #[test]
    fn test_broadcast_with_exclusion() {
        let (outbox, registry) = registry();
        let (alice, mut rx1) = connect(&outbox, "conn-1");
        let (bob, mut rx2) = connect(&outbox, "conn-2");

        registry.join(&alice, "lobby");
        registry.join(&bob, "lobby");

        let count = registry.broadcast("lobby", Envelope::status("hello"), Some(&alice));
        assert_eq!(count, 1);
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx2), vec![Envelope::status("hello")]);
    }

    #[test]
    fn test_broadcast_excluding_non_member_reaches_all() {
        let (outbox, registry) = registry();
        let (alice, mut rx1) = connect(&outbox, "conn-1");
        let (bob, mut rx2) = connect(&outbox, "conn-2");

        registry.join(&alice, "lobby");
        registry.join(&bob, "lobby");

        let ghost = ConnectionId::from("ghost");
        assert_eq!(registry.broadcast("lobby", Envelope::chat("x"), Some(&ghost)), 2);
        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[test]
    fn test_room_isolation() {
        let (outbox, registry) = registry();
        let (alice, mut rx1) = connect(&outbox, "conn-1");
        let (bob, mut rx2) = connect(&outbox, "conn-2");

        registry.join(&alice, "lobby");
        registry.join(&bob, "kitchen");

        registry.broadcast("lobby", Envelope::chat("Alice: hi"), None);

        assert_eq!(drain(&mut rx1), vec![Envelope::chat("Alice: hi")]);
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn test_broadcast_after_leave_skips_leaver() {
        let (outbox, registry) = registry();
        let (alice, mut rx1) = connect(&outbox, "conn-1");
        let (bob, mut rx2) = connect(&outbox, "conn-2");

        registry.join(&alice, "lobby");
        registry.join(&bob, "lobby");
        registry.leave(&alice, "lobby");

        registry.broadcast("lobby", Envelope::chat("Bob: anyone?"), None);

        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[test]
    fn test_failed_delivery_does_not_abort_fanout() {
        let (outbox, registry) = registry();
        let (alice, rx1) = connect(&outbox, "conn-1");
        let (bob, mut rx2) = connect(&outbox, "conn-2");
        let carol = ConnectionId::from("conn-3");

        registry.join(&alice, "lobby");
        registry.join(&bob, "lobby");
        // Carol never registered a queue, Alice's queue is gone.
        registry.join(&carol, "lobby");
        drop(rx1);

        let count = registry.broadcast("lobby", Envelope::chat("Bob: hi"), None);
        assert_eq!(count, 1);
        assert_eq!(drain(&mut rx2), vec![Envelope::chat("Bob: hi")]);
    }

    #[test]
    fn test_emit_to_connection() {
        let (outbox, registry) = registry();
        let (alice, mut rx) = connect(&outbox, "conn-1");

        assert!(registry.emit_to_connection(&alice, Envelope::status("hi")));
        assert!(!registry.emit_to_connection(&ConnectionId::from("ghost"), Envelope::status("hi")));
        assert_eq!(drain(&mut rx), vec![Envelope::status("hi")]);
    }

    #[test]
    fn test_concurrent_joins() {
        let (outbox, registry) = registry();
        let registry = Arc::new(registry);
        let ids: Vec<ConnectionId> = (0..64)
            .map(|i| {
                let id = ConnectionId::from(format!("conn-{i}"));
                let _ = outbox.register(id.clone());
                id
            })
            .collect();

        std::thread::scope(|scope| {
            for id in &ids {
                let registry = Arc::clone(&registry);
                scope.spawn(move || registry.join(id, "lobby"));
            }
        });

        let mut members = registry.members("lobby");
        members.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(members, expected);
    }

    #[test]
    fn test_concurrent_churn_leaves_consistent_state() {
        let (_outbox, registry) = registry();
        let registry = Arc::new(registry);

        std::thread::scope(|scope| {
            for i in 0..16 {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    let id = ConnectionId::from(format!("conn-{i}"));
                    for round in 0..200 {
                        let room = format!("room-{}", round % 4);
                        registry.join(&id, &room);
                        registry.leave(&id, &room);
                    }
                    registry.join(&id, "final");
                });
            }
        });

        assert_eq!(registry.member_count("final"), 16);
        assert_eq!(registry.room_names(), vec!["final".to_string()]);
        assert_eq!(
            registry.stats(),
            RegistryStats {
                room_count: 1,
                member_count: 16
            }
        );
    }

    /// Outbox whose `emit` parks until released, holding the room's lock.
    struct GatedOutbox {
        entered: Mutex<std::sync::mpsc::Sender<()>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl Outbox for GatedOutbox {
        fn emit(
            &self,
            _connection_id: &ConnectionId,
            _envelope: Arc<Envelope>,
        ) -> Result<(), crate::outbox::DeliveryError> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
            Ok(())
        }
    }

    #[test]
    fn test_stalled_broadcast_does_not_block_other_rooms() {
        use std::sync::mpsc;
        use std::time::Duration;

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let registry = RoomRegistry::new(Arc::new(GatedOutbox {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }));
        registry.join(&ConnectionId::from("stalled"), "room-a");

        std::thread::scope(|scope| {
            scope.spawn(|| registry.broadcast("room-a", Envelope::chat("x"), None));
            entered_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("broadcast never reached the outbox");

            let (done_tx, done_rx) = mpsc::channel();
            let registry = &registry;
            scope.spawn(move || {
                for i in 0..256 {
                    let id = ConnectionId::from(format!("conn-{i}"));
                    let room = format!("other-{i}");
                    registry.join(&id, &room);
                    registry.leave(&id, &room);
                    registry.join(&id, &room);
                }
                let _ = done_tx.send(());
            });

            let finished = done_rx.recv_timeout(Duration::from_secs(5));
            release_tx.send(()).unwrap();
            assert!(finished.is_ok(), "joins to other rooms waited on room-a");
        });

        assert_eq!(registry.stats().room_count, 257);
        assert!(registry.is_member(&ConnectionId::from("conn-7"), "other-7"));
    }

    #[test]
    fn test_concurrent_join_and_reclaim_of_one_room() {
        let (_outbox, registry) = registry();
        let registry = Arc::new(registry);

        std::thread::scope(|scope| {
            for i in 0..8 {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    let id = ConnectionId::from(format!("conn-{i}"));
                    for _ in 0..500 {
                        registry.join(&id, "lobby");
                        registry.leave(&id, "lobby");
                    }
                });
            }
            // One member that stays put must survive every reclaim attempt.
            let anchor = ConnectionId::from("anchor");
            registry.join(&anchor, "lobby");
        });

        assert_eq!(registry.members("lobby"), vec![ConnectionId::from("anchor")]);
        assert_eq!(registry.stats().room_count, 1);
    }
}
