#![forbid(unsafe_code)]

//! Protocol classification and the raw message envelope.
//!
//! Every CR-terminated line pulled off a client socket is classified by a
//! single pure function over the byte slice. The classifier is a fixed
//! chain: command, then formatted text, then vendor timing. A line that
//! matches none of them is noise and gets dropped by the caller.

use std::time::SystemTime;

use crate::timing;
use crate::wire;

/// Longest valid protocol line, including the end-of-line byte.
pub const MAX_LINE: usize = 96;

/// Prefix identifying an in-house command line.
pub const COMMAND_PREFIX: &[u8] = b"~)'";

/// The protocol a raw line was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Fixed-width record from the vendor timing mainboard.
    VendorTiming,
    /// Plain text to show on the panel as-is.
    SimpleText,
    /// In-house control command (never displayed).
    Command,
    /// In-house formatted-text order (wire form).
    FormattedText,
    /// Unclassifiable.
    Unknown,
}

/// A protocol-tagged line with its arrival time.
///
/// Messages are copied through the per-client queues and the active
/// outbox; the payload never exceeds [`MAX_LINE`] bytes.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Classified protocol.
    pub protocol: Protocol,
    /// Payload. For commands this is the bytes after the prefix; for
    /// vendor and formatted lines the line without its EOL.
    pub data: String,
    /// Arrival wall-clock time.
    pub timestamp: SystemTime,
}

impl RawMessage {
    /// Tag a payload with a protocol, stamped now.
    pub fn new(protocol: Protocol, data: impl Into<String>) -> Self {
        Self {
            protocol,
            data: data.into(),
            timestamp: SystemTime::now(),
        }
    }

    /// The empty SIMPLE_TEXT order that clears the panel.
    pub fn clear() -> Self {
        Self::new(Protocol::SimpleText, "")
    }

    /// True for message kinds that reach the display (everything except
    /// commands and unknowns).
    pub fn is_displayable(&self) -> bool {
        matches!(
            self.protocol,
            Protocol::VendorTiming | Protocol::SimpleText | Protocol::FormattedText
        )
    }
}

/// Classify one raw line (still carrying its CR terminator).
pub fn classify_line(line: &[u8]) -> Protocol {
    if is_command_line(line) {
        Protocol::Command
    } else if is_formatted_line(line) {
        Protocol::FormattedText
    } else if timing::is_vendor_timing_line(line) {
        Protocol::VendorTiming
    } else {
        Protocol::Unknown
    }
}

/// Command lines: prefix, at least one printable payload byte, CR.
fn is_command_line(line: &[u8]) -> bool {
    let Some(rest) = line.strip_prefix(COMMAND_PREFIX) else {
        return false;
    };
    let Some(payload) = rest.strip_suffix(&[timing::EOL]) else {
        return false;
    };
    !payload.is_empty() && payload.iter().all(|&b| b == b' ' || b.is_ascii_graphic())
}

/// Formatted-text lines must decode fully; a bad token disqualifies the
/// whole line.
fn is_formatted_line(line: &[u8]) -> bool {
    let text = String::from_utf8_lossy(line);
    wire::decode(&text).is_ok()
}

/// The payload of a command line (bytes between prefix and CR), or `None`
/// when the line is not a command.
pub fn command_payload(line: &[u8]) -> Option<&[u8]> {
    if !is_command_line(line) {
        return None;
    }
    line.strip_prefix(COMMAND_PREFIX)?.strip_suffix(&[timing::EOL])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_commands_first() {
        assert_eq!(classify_line(b"~)'?\r"), Protocol::Command);
        assert_eq!(classify_line(b"~)'*10.0.0.7\r"), Protocol::Command);
        assert_eq!(classify_line(b"~)'&1\r"), Protocol::Command);
    }

    #[test]
    fn classifies_formatted_text() {
        assert_eq!(classify_line(b"~+/=hello\r"), Protocol::FormattedText);
        assert_eq!(
            classify_line(b"~+/!1F00ff00V+007.0=1:23\r"),
            Protocol::FormattedText
        );
    }

    #[test]
    fn classifies_vendor_lines() {
        assert_eq!(
            classify_line(b"007D    00:01:23.456 2\r"),
            Protocol::VendorTiming
        );
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(classify_line(b"hello world\r"), Protocol::Unknown);
        assert_eq!(classify_line(b"~)'\r"), Protocol::Unknown);
        assert_eq!(classify_line(b"~+/Q=bad token\r"), Protocol::Unknown);
        assert_eq!(classify_line(b""), Protocol::Unknown);
    }

    #[test]
    fn command_needs_printable_payload() {
        assert_eq!(classify_line(b"~)'\x01\r"), Protocol::Unknown);
        assert_eq!(command_payload(b"~)'&1\r"), Some(&b"&1"[..]));
        assert_eq!(command_payload(b"~)'\r"), None);
        assert_eq!(command_payload(b"plain\r"), None);
    }

    #[test]
    fn clear_message_is_displayable_and_empty() {
        let msg = RawMessage::clear();
        assert_eq!(msg.protocol, Protocol::SimpleText);
        assert_eq!(msg.data, "");
        assert!(msg.is_displayable());
    }

    #[test]
    fn commands_are_not_displayable() {
        assert!(!RawMessage::new(Protocol::Command, "?").is_displayable());
        assert!(!RawMessage::new(Protocol::Unknown, "x").is_displayable());
    }
}
