//! Connection records.
//!
//! A [`Connection`] is the core's view of one live client session: a stable
//! identifier, the display name it was opened with, and the room it was
//! bootstrapped into. The transport owns the physical socket.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counter mixed into generated IDs so two handshakes in the same
/// nanosecond still get distinct identifiers.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A live client session as seen by the dispatcher.
///
/// `identity` and `room` come from session bootstrap and are taken
/// verbatim: empty strings are legal and are rendered into message text
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    id: ConnectionId,
    identity: String,
    room: Option<String>,
}

impl Connection {
    /// Create a connection with no room yet.
    #[must_use]
    pub fn new(id: ConnectionId, identity: impl Into<String>) -> Self {
        Self {
            id,
            identity: identity.into(),
            room: None,
        }
    }

    /// Set the room the connection was bootstrapped into.
    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the display name.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Room name used for registry operations.
    ///
    /// A connection without a room operates on the empty-string room, a
    /// degenerate room that only that connection ever joins.
    #[must_use]
    pub fn room(&self) -> &str {
        self.room.as_deref().unwrap_or("")
    }
}
