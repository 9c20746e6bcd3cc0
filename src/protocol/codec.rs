//! Protocol codec for chat traffic
//!
//! Outgoing chat lines are `name> message\n`. Inbound bytes are split into
//! chat entries either per newline or per read, depending on the framing mode.

use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ChatEntry, LINE_TERMINATOR, SENDER_SEPARATOR};

/// Default cap on a pending inbound line before it is flushed as-is
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported baud rate: {0} (expected one of 9600, 19200, 38400, 57600, 115200)")]
    UnsupportedBaud(u32),

    #[error("Invalid baud rate: {0:?}")]
    InvalidBaud(String),

    #[error("Invalid batching strategy: {0:?}")]
    InvalidBatching(String),

    #[error("Chunk size must be at least 1 byte")]
    ZeroChunkSize,
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Remove every carriage return and newline from a chat field
pub fn sanitize_field(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// An encoded chat line together with its local echo
#[derive(Debug, Clone)]
pub struct EncodedChat {
    /// Bytes to put on the wire
    pub wire: Bytes,
    /// Entry to append to the local log immediately
    pub echo: ChatEntry,
}

/// Encode an outgoing chat message
pub fn encode_chat(name: &str, message: &str) -> EncodedChat {
    let name = sanitize_field(name);
    let message = sanitize_field(message);

    let mut line = String::with_capacity(name.len() + message.len() + 3);
    line.push_str(&name);
    line.push_str(SENDER_SEPARATOR);
    line.push_str(&message);
    line.push(LINE_TERMINATOR as char);

    EncodedChat {
        wire: Bytes::from(line),
        echo: ChatEntry::outgoing(name, message),
    }
}

/// How inbound bytes are split into chat entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InboundFraming {
    /// One entry per newline-terminated line, reassembled across reads
    #[default]
    Line,
    /// One entry per read event, text taken verbatim
    PerRead,
}

/// Turns inbound link bytes into chat entries
pub struct ChatDecoder {
    framing: InboundFraming,
    max_line_len: usize,
    pending: BytesMut,
}

impl ChatDecoder {
    pub fn new(framing: InboundFraming, max_line_len: usize) -> Self {
        Self {
            framing,
            max_line_len: max_line_len.max(1),
            pending: BytesMut::with_capacity(256),
        }
    }

    /// Number of buffered bytes that have not formed an entry yet
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one read's worth of bytes and collect any entries it completes
    pub fn decode(&mut self, data: &[u8]) -> Vec<ChatEntry> {
        match self.framing {
            InboundFraming::PerRead => {
                if data.is_empty() {
                    return Vec::new();
                }
                let text = String::from_utf8_lossy(data).into_owned();
                vec![ChatEntry::incoming(None, text)]
            }
            InboundFraming::Line => {
                self.pending.extend_from_slice(data);
                let mut entries = Vec::new();

                loop {
                    match self.pending.iter().position(|b| *b == LINE_TERMINATOR) {
                        Some(pos) => {
                            let line = self.pending.split_to(pos);
                            self.pending.advance(1);
                            if let Some(entry) = line_to_entry(&line) {
                                entries.push(entry);
                            }
                        }
                        None if self.pending.len() > self.max_line_len => {
                            // Keep a character cut short by the read for the next flush
                            let cut = utf8_boundary(&self.pending);
                            if cut == 0 {
                                break;
                            }
                            tracing::debug!("Flushing unterminated inbound line of {} bytes", cut);
                            let line = self.pending.split_to(cut);
                            if let Some(entry) = line_to_entry(&line) {
                                entries.push(entry);
                            }
                        }
                        None => break,
                    }
                }

                entries
            }
        }
    }

    /// Flush whatever partial line is still buffered
    pub fn finish(&mut self) -> Option<ChatEntry> {
        if self.pending.is_empty() {
            return None;
        }
        let line = self.pending.split();
        line_to_entry(&line)
    }
}

/// Length of the prefix that does not end in an incomplete UTF-8 sequence
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}

fn line_to_entry(line: &[u8]) -> Option<ChatEntry> {
    let text = String::from_utf8_lossy(line);
    let text = text.strip_suffix('\r').unwrap_or(&*text);
    if text.is_empty() {
        return None;
    }

    let entry = match text.split_once(SENDER_SEPARATOR) {
        Some((sender, message)) if !sender.is_empty() => {
            ChatEntry::incoming(Some(sender.to_string()), message)
        }
        _ => ChatEntry::incoming(None, text),
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Direction;

    #[test]
    fn test_encode_chat_wire_and_echo() {
        let encoded = encode_chat("alice", "hello");
        assert_eq!(&encoded.wire[..], b"alice> hello\n");
        assert_eq!(encoded.echo.body(), "alice> hello");
        assert_eq!(encoded.echo.direction, Direction::Outgoing);

        let rendered = encoded.echo.to_string();
        assert_eq!(
            rendered,
            format!("{}\nalice> hello", encoded.echo.formatted_timestamp())
        );
    }

    #[test]
    fn test_encode_strips_line_breaks() {
        let encoded = encode_chat("al\r\nice", "multi\nline\rtext");
        assert_eq!(&encoded.wire[..], b"alice> multilinetext\n");
        assert_eq!(encoded.wire.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(encoded.echo.sender.as_deref(), Some("alice"));
    }

    #[test]
    fn test_encode_utf8() {
        let encoded = encode_chat("joão", "olá");
        assert_eq!(&encoded.wire[..], "joão> olá\n".as_bytes());
    }

    #[test]
    fn test_line_framing_reassembles() {
        let mut decoder = ChatDecoder::new(InboundFraming::Line, DEFAULT_MAX_LINE_LEN);

        let first = decoder.decode(b"bob> hi\nbob> th");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].sender.as_deref(), Some("bob"));
        assert_eq!(first[0].message, "hi");
        assert_eq!(decoder.pending_len(), 7);

        let second = decoder.decode(b"ere\r\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message, "there");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_line_framing_skips_blank_lines() {
        let mut decoder = ChatDecoder::new(InboundFraming::Line, DEFAULT_MAX_LINE_LEN);
        let entries = decoder.decode(b"\n\r\nplain text\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sender, None);
        assert_eq!(entries[0].body(), "plain text");
    }

    #[test]
    fn test_line_framing_overflow_flush() {
        let mut decoder = ChatDecoder::new(InboundFraming::Line, 4);
        let entries = decoder.decode(b"abcdefg");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "abcdefg");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_overflow_flush_keeps_split_character() {
        let mut decoder = ChatDecoder::new(InboundFraming::Line, 4);
        let mut entries = decoder.decode("éé".as_bytes());
        assert!(entries.is_empty());

        entries.extend(decoder.decode(&[0xC3]));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "éé");
        assert_eq!(decoder.pending_len(), 1);

        entries.extend(decoder.decode(&[0xA9, b'\n']));
        let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["éé", "é"]);
        assert!(messages.iter().all(|m| !m.contains('\u{FFFD}')));
    }

    #[test]
    fn test_overflow_flush_with_invalid_bytes() {
        let mut decoder = ChatDecoder::new(InboundFraming::Line, 2);
        let entries = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "a\u{FFFD}b");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_finish_flushes_partial() {
        let mut decoder = ChatDecoder::new(InboundFraming::Line, DEFAULT_MAX_LINE_LEN);
        assert!(decoder.decode(b"carol> bye").is_empty());
        let entry = decoder.finish().unwrap();
        assert_eq!(entry.body(), "carol> bye");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_per_read_is_verbatim() {
        let mut decoder = ChatDecoder::new(InboundFraming::PerRead, DEFAULT_MAX_LINE_LEN);
        let entries = decoder.decode(b"bob> hi\nbob> th");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sender, None);
        assert_eq!(entries[0].message, "bob> hi\nbob> th");
        assert!(decoder.decode(b"").is_empty());
    }

    #[test]
    fn test_per_read_lossy_utf8() {
        let mut decoder = ChatDecoder::new(InboundFraming::PerRead, DEFAULT_MAX_LINE_LEN);
        let entries = decoder.decode(&[b'o', b'k', 0xFF]);
        assert_eq!(entries[0].message, "ok\u{FFFD}");
    }
}
