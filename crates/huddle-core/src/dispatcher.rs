//! Event dispatch.
//!
//! The dispatcher maps the three client events onto registry operations:
//!
//! | event    | effect |
//! |----------|--------|
//! | `joined` | join the connection's room, greet the connection alone |
//! | `text`   | broadcast a chat line to the room, sender included |
//! | `left`   | leave the room, tell the remaining members |
//!
//! The greeting on `joined` goes only to the joining connection; other
//! members are not told that someone arrived.
//!
//! Callers must deliver one connection's events in arrival order and never
//! concurrently. Different connections may dispatch in parallel.

use crate::connection::Connection;
use crate::message;
use crate::registry::RoomRegistry;
use huddle_protocol::EventName;
use std::sync::Arc;
use tracing::debug;

/// Routes client events to the room registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RoomRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Get the registry.
    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Handle one inbound event.
    ///
    /// Returns the number of envelopes queued as a result.
    pub fn deliver(&self, connection: &Connection, event: EventName, payload: &str) -> usize {
        debug!(
            connection = %connection.id(),
            room = %connection.room(),
            event = %event,
            "Dispatching"
        );

        match event {
            EventName::Joined => self.joined(connection),
            EventName::Text => self.text(connection, payload),
            EventName::Left => self.left(connection),
        }
    }

    /// Tear down a connection whose transport went away.
    ///
    /// If the connection still occupies a room this behaves like a `left`
    /// event for that room. A connection that already left produces no
    /// further notices. Returns the number of envelopes queued.
    pub fn disconnect(&self, connection: &Connection) -> usize {
        match self.registry.room_of(connection.id()) {
            Some(room) => {
                debug!(connection = %connection.id(), room = %room, "Synthesizing left on disconnect");
                self.depart(connection, &room)
            }
            None => 0,
        }
    }

    fn joined(&self, connection: &Connection) -> usize {
        self.registry.join(connection.id(), connection.room());
        let greeted = self
            .registry
            .emit_to_connection(connection.id(), message::entered(connection.identity()));
        usize::from(greeted)
    }

    fn text(&self, connection: &Connection, body: &str) -> usize {
        self.registry.broadcast(
            connection.room(),
            message::chat(connection.identity(), body),
            None,
        )
    }

    fn left(&self, connection: &Connection) -> usize {
        self.depart(connection, connection.room())
    }

    fn depart(&self, connection: &Connection, room: &str) -> usize {
        self.registry.leave(connection.id(), room);
        self.registry.broadcast(
            room,
            message::left(connection.identity()),
            Some(connection.id()),
        )
    }
}
