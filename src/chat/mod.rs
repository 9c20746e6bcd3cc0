//! Chat log
//!
//! Append-only record of every message shown to the user. Insertion order is
//! display order; entries are never edited or removed.

use crate::protocol::{ChatEntry, Direction};

#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return a reference to it as stored
    pub fn append(&mut self, entry: ChatEntry) -> &ChatEntry {
        tracing::debug!(direction = ?entry.direction, "chat: {}", entry.body());
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, direction: Direction) -> usize {
        self.entries
            .iter()
            .filter(|e| e.direction == direction)
            .count()
    }

    /// Render the whole log the way it is displayed, one entry per block
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_chat, ChatDecoder, InboundFraming, DEFAULT_MAX_LINE_LEN};

    #[test]
    fn test_insertion_order_is_display_order() {
        let mut log = ChatLog::new();
        log.append(encode_chat("alice", "first").echo);
        let mut decoder = ChatDecoder::new(InboundFraming::Line, DEFAULT_MAX_LINE_LEN);
        for entry in decoder.decode(b"bob> second\nbob> third\n") {
            log.append(entry);
        }

        let bodies: Vec<String> = log.entries().iter().map(|e| e.body()).collect();
        assert_eq!(bodies, vec!["alice> first", "bob> second", "bob> third"]);
        assert_eq!(log.count(Direction::Outgoing), 1);
        assert_eq!(log.count(Direction::Incoming), 2);
    }

    #[test]
    fn test_local_echo_rendering() {
        let mut log = ChatLog::new();
        let stored = log.append(encode_chat("alice", "hello").echo).clone();
        assert_eq!(
            log.render(),
            format!("{}\nalice> hello", stored.formatted_timestamp())
        );
        assert_eq!(log.entries(), &[stored][..]);
    }

    #[test]
    fn test_empty_log() {
        let log = ChatLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert_eq!(log.render(), "");
    }
}
