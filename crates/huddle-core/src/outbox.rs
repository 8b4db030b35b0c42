//! Outbound delivery to connections.
//!
//! The registry never touches sockets. It hands envelopes to an [`Outbox`],
//! which the transport implements. Emission must not block: the registry
//! emits while holding a room's lock.

use crate::connection::ConnectionId;
use dashmap::DashMap;
use huddle_protocol::Envelope;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Per-recipient delivery errors.
///
/// These never abort a fan-out and are never reported to the sender.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// No outbound queue is registered for the connection.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's queue was closed by the transport.
    #[error("Connection closed: {0}")]
    Closed(ConnectionId),
}

/// Sink for envelopes addressed to a single connection.
pub trait Outbox: Send + Sync {
    /// Queue an envelope for a connection without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot receive the envelope.
    fn emit(&self, connection_id: &ConnectionId, envelope: Arc<Envelope>)
        -> Result<(), DeliveryError>;
}

/// Receiving half of a connection's outbound queue.
pub type EnvelopeReceiver = mpsc::UnboundedReceiver<Arc<Envelope>>;

/// An [`Outbox`] backed by one unbounded channel per connection.
///
/// The transport registers a queue at handshake and drains it from the
/// connection's task.
#[derive(Debug, Default)]
pub struct ChannelOutbox {
    senders: DashMap<ConnectionId, mpsc::UnboundedSender<Arc<Envelope>>>,
}

impl ChannelOutbox {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and get the receiving end of its queue.
    ///
    /// Registering an ID again replaces the previous queue.
    pub fn register(&self, connection_id: ConnectionId) -> EnvelopeReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection = %connection_id, "Outbox registered");
        self.senders.insert(connection_id, tx);
        rx
    }

    /// Drop a connection's queue.
    ///
    /// Returns `true` if the connection was registered.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.senders.remove(connection_id).is_some();
        if removed {
            debug!(connection = %connection_id, "Outbox unregistered");
        }
        removed
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.senders.contains_key(connection_id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Check if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl Outbox for ChannelOutbox {
    fn emit(
        &self,
        connection_id: &ConnectionId,
        envelope: Arc<Envelope>,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .get(connection_id)
            .ok_or_else(|| DeliveryError::UnknownConnection(connection_id.clone()))?;

        sender
            .send(envelope)
            .map_err(|_| DeliveryError::Closed(connection_id.clone()))?;

        trace!(connection = %connection_id, "Envelope queued");
        Ok(())
    }
}
