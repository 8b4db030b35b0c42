//! Message templates.
//!
//! Every envelope the relay emits is rendered from one of these templates.

use huddle_protocol::Envelope;

/// Notice sent to a connection when it enters its room.
#[must_use]
pub fn entered(identity: &str) -> Envelope {
    Envelope::status(format!("{identity} has entered the room."))
}

/// Notice broadcast to a room when a member leaves.
#[must_use]
pub fn left(identity: &str) -> Envelope {
    Envelope::status(format!("{identity} has left the room."))
}

/// A chat line from a room member.
#[must_use]
pub fn chat(identity: &str, body: &str) -> Envelope {
    Envelope::chat(format!("{identity}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::EnvelopeKind;

    #[test]
    fn test_templates() {
        assert_eq!(entered("Alice"), Envelope::status("Alice has entered the room."));
        assert_eq!(left("Alice"), Envelope::status("Alice has left the room."));
        assert_eq!(chat("Alice", "hi"), Envelope::chat("Alice: hi"));
    }

    #[test]
    fn test_templates_render_empty_fields_verbatim() {
        let envelope = chat("", "");
        assert_eq!(envelope.kind, EnvelopeKind::Chat);
        assert_eq!(envelope.text, ": ");
        assert_eq!(entered("").text, " has entered the room.");
    }
}
