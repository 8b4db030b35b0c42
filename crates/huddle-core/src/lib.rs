//! # huddle-core
//!
//! Connection, room registry and event dispatch for the Huddle room relay.
//!
//! This crate provides the stateful part of the relay:
//!
//! - **Connection** - Typed record of a client session (id, identity, room)
//! - **Room** / **RoomRegistry** - Room membership and broadcast fan-out
//! - **Outbox** - Non-blocking delivery of envelopes to one connection
//! - **Dispatcher** - Maps `joined` / `text` / `left` events onto the registry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ Dispatcher  │────▶│ RoomRegistry │────▶│   Outbox    │
//! └─────────────┘     └─────────────┘     └──────────────┘     └─────────────┘
//!        ▲                                                            │
//!        └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use huddle_core::{ChannelOutbox, Connection, ConnectionId, Dispatcher, RoomRegistry};
//! use huddle_protocol::{Envelope, EventName};
//!
//! let outbox = Arc::new(ChannelOutbox::new());
//! let dispatcher = Dispatcher::new(Arc::new(RoomRegistry::new(outbox.clone())));
//!
//! let id = ConnectionId::generate();
//! let mut rx = outbox.register(id.clone());
//! let alice = Connection::new(id, "Alice").with_room("lobby");
//!
//! dispatcher.deliver(&alice, EventName::Joined, "");
//! dispatcher.deliver(&alice, EventName::Text, "hi");
//!
//! assert_eq!(*rx.try_recv().unwrap(), Envelope::status("Alice has entered the room."));
//! assert_eq!(*rx.try_recv().unwrap(), Envelope::chat("Alice: hi"));
//! ```

pub mod connection;
pub mod dispatcher;
pub mod message;
pub mod outbox;
pub mod registry;
pub mod room;

pub use connection::{Connection, ConnectionId};
pub use dispatcher::Dispatcher;
pub use outbox::{ChannelOutbox, DeliveryError, EnvelopeReceiver, Outbox};
pub use registry::{RegistryConfig, RegistryStats, RoomRegistry};
pub use room::{Room, RoomName};
