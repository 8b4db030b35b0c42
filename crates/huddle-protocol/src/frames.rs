//! Frame types for the Huddle protocol.
//!
//! Frames are the unit of communication between a client and the relay.
//! Clients send `event` frames; the relay answers with `envelope` frames
//! carrying rendered room messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::ProtocolError;

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// The frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 1001;
    /// The frame decoded but is not something a client may send.
    pub const UNEXPECTED_FRAME: u16 = 1003;
    /// The message exceeded the configured size limit.
    pub const MESSAGE_TOO_LARGE: u16 = 1009;
}

/// Inbound event names a client may send.
///
/// Decoding goes through [`FromStr`], so an unknown name is rejected with
/// [`ProtocolError::UnknownEvent`] in both wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum EventName {
    /// The client entered its room.
    Joined,
    /// The client sent a chat line.
    Text,
    /// The client is leaving its room.
    Left,
}

impl EventName {
    /// Get the wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Joined => "joined",
            EventName::Text => "text",
            EventName::Left => "left",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "joined" => Ok(EventName::Joined),
            "text" => Ok(EventName::Text),
            "left" => Ok(EventName::Left),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

impl TryFrom<String> for EventName {
    type Error = ProtocolError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Kind of an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Room status notice (entered, left).
    Status,
    /// A chat line from a room member.
    Chat,
}

/// An outbound message delivered to one or more connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind.
    pub kind: EnvelopeKind,
    /// Rendered human-readable text.
    pub text: String,
}

impl Envelope {
    /// Create a status envelope.
    #[must_use]
    pub fn status(text: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Status,
            text: text.into(),
        }
    }

    /// Create a chat envelope.
    #[must_use]
    pub fn chat(text: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Chat,
            text: text.into(),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client event for the dispatcher.
    #[serde(rename = "event")]
    Event {
        /// Event name.
        event: EventName,
        /// Event payload; the message body for `text`.
        #[serde(default)]
        payload: String,
    },

    /// Rendered room message.
    #[serde(rename = "envelope")]
    Envelope {
        /// Envelope kind.
        kind: EnvelopeKind,
        /// Rendered text.
        text: String,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Display name the session was opened with.
        identity: String,
        /// Room the session was opened for.
        room: String,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Create an event frame.
    #[must_use]
    pub fn event(event: EventName, payload: impl Into<String>) -> Self {
        Frame::Event {
            event,
            payload: payload.into(),
        }
    }

    /// Create a `joined` event frame.
    #[must_use]
    pub fn joined() -> Self {
        Self::event(EventName::Joined, "")
    }

    /// Create a `text` event frame.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::event(EventName::Text, body)
    }

    /// Create a `left` event frame.
    #[must_use]
    pub fn left() -> Self {
        Self::event(EventName::Left, "")
    }

    /// Create a connected frame.
    #[must_use]
    pub fn connected(
        connection_id: impl Into<String>,
        identity: impl Into<String>,
        room: impl Into<String>,
        heartbeat: u32,
    ) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            identity: identity.into(),
            room: room.into(),
            heartbeat,
        }
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Short name of the frame type, for logs.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Event { .. } => "event",
            Frame::Envelope { .. } => "envelope",
            Frame::Connected { .. } => "connected",
            Frame::Error { .. } => "error",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
        }
    }

    /// Take the envelope out of an envelope frame.
    #[must_use]
    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            Frame::Envelope { kind, text } => Some(Envelope { kind, text }),
            _ => None,
        }
    }
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        Frame::Envelope {
            kind: envelope.kind,
            text: envelope.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_parse() {
        assert_eq!("joined".parse::<EventName>().unwrap(), EventName::Joined);
        assert_eq!("text".parse::<EventName>().unwrap(), EventName::Text);
        assert_eq!("left".parse::<EventName>().unwrap(), EventName::Left);
        assert!(matches!(
            "shout".parse::<EventName>(),
            Err(ProtocolError::UnknownEvent(name)) if name == "shout"
        ));
    }

    #[test]
    fn test_envelope_frame_conversion() {
        let frame = Frame::from(Envelope::chat("Alice: hi"));
        assert_eq!(frame.type_name(), "envelope");
        assert_eq!(frame.into_envelope(), Some(Envelope::chat("Alice: hi")));
        assert_eq!(Frame::ping().into_envelope(), None);
    }

    #[test]
    fn test_event_helpers() {
        assert_eq!(
            Frame::text("hi"),
            Frame::Event {
                event: EventName::Text,
                payload: "hi".to_string()
            }
        );
        assert_eq!(Frame::joined().type_name(), "event");
    }
}
