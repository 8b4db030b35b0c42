//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle room relay.
//!
//! This crate defines the frames exchanged between chat clients and the
//! relay, and the codecs that put them on the wire.
//!
//! ## Frame Types
//!
//! - `Event` - Client events: `joined`, `text`, `left`
//! - `Envelope` - Rendered room messages (`status` or `chat`)
//! - `Connected` / `Error` - Handshake and error replies
//! - `Ping` / `Pong` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, Frame};
//!
//! let frame = Frame::text("Hello, lobby!");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//!
//! let json = codec::encode_json(&frame).unwrap();
//! assert_eq!(codec::decode_json(&json).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{
    decode, encode, Encoded, FrameCodec, FrameReader, ProtocolError, ReadOutcome, WireFormat,
};
pub use frames::{codes, Envelope, EnvelopeKind, EventName, Frame};
