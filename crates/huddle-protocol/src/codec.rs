//! Codecs for encoding and decoding Huddle frames.
//!
//! Two encodings are supported:
//! - JSON, one frame per WebSocket text message.
//! - MessagePack with a 4-byte big-endian length prefix, carried in
//!   WebSocket binary messages. Frames may be split or batched across
//!   messages, so decoding is streaming.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event name outside `joined`, `text`, `left`.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Wire format name not recognized.
    #[error("Unknown wire format: {0}")]
    UnknownFormat(String),
}

/// Encode a frame to length-prefixed MessagePack.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode one length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

/// Encode a frame as a JSON document.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from a JSON document.
///
/// # Errors
///
/// Returns an error if the document is not a valid frame.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum WireFormat {
    /// JSON text messages.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary messages.
    Msgpack,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => f.write_str("json"),
            WireFormat::Msgpack => f.write_str("msgpack"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(WireFormat::Json),
            "msgpack" => Ok(WireFormat::Msgpack),
            other => Err(ProtocolError::UnknownFormat(other.to_string())),
        }
    }
}

impl TryFrom<String> for WireFormat {
    type Error = ProtocolError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// An encoded frame, ready to be written as a WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Send as a text message.
    Text(String),
    /// Send as a binary message.
    Binary(Bytes),
}

impl Encoded {
    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Check whether the encoding is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Codec bound to a connection's wire format.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec {
    format: WireFormat,
}

impl FrameCodec {
    /// Create a codec for the given format.
    #[must_use]
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// Get the wire format.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Encode a frame in this codec's format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Encoded, ProtocolError> {
        match self.format {
            WireFormat::Json => encode_json(frame).map(Encoded::Text),
            WireFormat::Msgpack => encode(frame).map(Encoded::Binary),
        }
    }

    /// Decode a frame from a text message.
    ///
    /// Text messages are always JSON, whatever the codec's format.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_text(&self, text: &str) -> Result<Frame, ProtocolError> {
        decode_json(text)
    }

    /// Try to decode a frame from a binary read buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is invalid.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        decode_from(buf)
    }
}

/// Result of pulling one frame out of a [`FrameReader`].
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete frame.
    Frame(Frame),
    /// A frame announced a payload over the reader's limit. Its bytes are
    /// skipped, including any that have not arrived yet.
    TooLarge(usize),
    /// A complete frame whose payload did not decode. The frame is
    /// consumed and the stream stays aligned.
    Malformed(ProtocolError),
}

/// Reassembles length-prefixed MessagePack frames from binary messages.
///
/// Frames may be split or batched across messages. The length prefix is
/// checked against `limit` as soon as it arrives, so an oversized frame is
/// never buffered.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    /// Bytes of a rejected frame still to be dropped from future input.
    discard: usize,
    limit: usize,
}

impl FrameReader {
    /// Create a reader accepting payloads of at most `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            discard: 0,
            limit: limit.min(MAX_FRAME_SIZE),
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        let skipped = self.discard.min(data.len());
        self.discard -= skipped;
        self.buffer.extend_from_slice(&data[skipped..]);
    }

    /// Number of bytes buffered towards the next frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered and pending input.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discard = 0;
    }

    /// Pull the next frame, or `None` if more input is needed.
    pub fn next_frame(&mut self) -> Option<ReadOutcome> {
        if self.buffer.len() >= LENGTH_PREFIX_SIZE {
            let length =
                u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                    as usize;

            if length > self.limit {
                let total = LENGTH_PREFIX_SIZE + length;
                if self.buffer.len() >= total {
                    self.buffer.advance(total);
                } else {
                    self.discard = total - self.buffer.len();
                    self.buffer.clear();
                }
                return Some(ReadOutcome::TooLarge(length));
            }
        }

        match decode_from(&mut self.buffer) {
            Ok(Some(frame)) => Some(ReadOutcome::Frame(frame)),
            Ok(None) => None,
            Err(e) => Some(ReadOutcome::Malformed(e)),
        }
    }
}
