//! Shared fixtures for the Huddle benchmarks.

use huddle_core::{
    ChannelOutbox, Connection, ConnectionId, Dispatcher, EnvelopeReceiver, RoomRegistry,
};
use std::sync::Arc;

/// A dispatcher with one room already populated.
pub struct PopulatedRoom {
    /// Dispatcher over the populated registry.
    pub dispatcher: Dispatcher,
    /// Members, in join order.
    pub members: Vec<Connection>,
    /// Outbound queues, one per member.
    pub receivers: Vec<EnvelopeReceiver>,
}

impl PopulatedRoom {
    /// Join `size` connections to `room` directly through the registry.
    pub fn new(room: &str, size: usize) -> Self {
        let outbox = Arc::new(ChannelOutbox::new());
        let registry = Arc::new(RoomRegistry::new(outbox.clone()));

        let mut members = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for i in 0..size {
            let id = ConnectionId::new(format!("conn-{i}"));
            receivers.push(outbox.register(id.clone()));
            registry.join(&id, room);
            members.push(Connection::new(id, format!("user-{i}")).with_room(room));
        }

        Self {
            dispatcher: Dispatcher::new(registry),
            members,
            receivers,
        }
    }

    /// Discard everything queued so far.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        for rx in &mut self.receivers {
            while rx.try_recv().is_ok() {
                drained += 1;
            }
        }
        drained
    }
}
